//! Event loop driving one Session: link events first, then operator commands, then one
//! outgoing chunk per turn with a yield in between.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use duet_core::{
    display_room_token, format_bytes, ArtifactHandle, ConnectionStatus, Direction, MediaDevices, OutboundAction,
    OutgoingFile, RemoteStream, Session, SignalingError, TransferError, TransferStatus,
    TransportEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::discovery::{Registration, Rendezvous};
use crate::media::HeadlessMedia;
use crate::transport::{self, Channel, LinkEvent};

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    SendFile(PathBuf),
    Mute,
    Camera,
    Status,
    Files,
    Leave,
}

/// `/send <path>`, `/mute`, `/camera`, `/status`, `/files`, `/leave`; anything else is chat.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (line, ""),
    };
    match head {
        "/send" if rest.is_empty() => None,
        "/send" => Some(Command::SendFile(PathBuf::from(rest))),
        "/mute" => Some(Command::Mute),
        "/camera" => Some(Command::Camera),
        "/status" => Some(Command::Status),
        "/files" => Some(Command::Files),
        "/leave" | "/quit" => Some(Command::Leave),
        _ => Some(Command::Chat(line.to_owned())),
    }
}

pub struct Runner {
    session: Session,
    rendezvous: Rendezvous,
    media: HeadlessMedia,
    transport_port: u16,
    download_dir: PathBuf,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    channel: Option<Channel>,
    peer: Option<SocketAddr>,
    registration: Option<Registration>,
    accept_task: Option<JoinHandle<()>>,
    status_tx: watch::Sender<ConnectionStatus>,
    saved_tx: watch::Sender<Vec<PathBuf>>,
}

impl Runner {
    pub fn new(session: Session, rendezvous: Rendezvous, media: HeadlessMedia, config: &Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(session.status());
        let (saved_tx, _) = watch::channel(Vec::new());
        Self {
            session,
            rendezvous,
            media,
            transport_port: config.transport_port,
            download_dir: config.download_dir.clone(),
            events_tx,
            events_rx,
            channel: None,
            peer: None,
            registration: None,
            accept_task: None,
            status_tx,
            saved_tx,
        }
    }

    /// Follows every status the session moves through.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Paths of received files written to the download dir, in completion order.
    pub fn saved(&self) -> watch::Receiver<Vec<PathBuf>> {
        self.saved_tx.subscribe()
    }

    /// Run until the session ends. Closing `commands` leaves the room.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> anyhow::Result<Session> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| format!("create download dir {}", self.download_dir.display()))?;

        let actions = match self.media.acquire_local_stream(true, true) {
            Ok(stream) => self.session.on_media_acquired(stream),
            Err(e) => self.session.on_media_failed(e),
        };
        self.apply(actions).await;

        let mut commands_open = true;
        while !self.session.status().is_terminal() {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.on_link_event(event).await,
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        commands_open = false;
                        let actions = self.session.leave();
                        self.apply(actions).await;
                    }
                },
                _ = std::future::ready(()), if self.session.has_pending_chunks() => {
                    let actions = self.session.pump_outgoing();
                    self.apply(actions).await;
                    tokio::task::yield_now().await;
                }
            }
        }

        let actions = self.session.leave();
        self.apply(actions).await;
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.registration = None;
        Ok(self.session)
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { channel, peer } => {
                if self.channel.is_some() || self.session.status().is_terminal() {
                    channel.close();
                    return;
                }
                self.channel = Some(channel);
                self.peer = Some(peer);
            }
            LinkEvent::Transport(event) => {
                let opened = event == TransportEvent::Opened;
                let actions = self.session.on_transport_event(event);
                self.apply(actions).await;
                if opened && self.session.status() == ConnectionStatus::Connected {
                    // Headless: the media call rides on the data channel.
                    let remote = RemoteStream {
                        id: self.peer.map(|p| p.to_string()).unwrap_or_default(),
                    };
                    let actions = self
                        .session
                        .on_transport_event(TransportEvent::RemoteStreamAvailable(remote));
                    self.apply(actions).await;
                }
            }
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Chat(text) => match self.session.send_chat(&text) {
                Ok(actions) => self.apply(actions).await,
                Err(e) => eprintln!("cannot send message: {e}"),
            },
            Command::SendFile(path) => self.send_file(&path).await,
            Command::Mute => match self.session.toggle_mute() {
                Some(true) => println!("* microphone muted"),
                Some(false) => println!("* microphone on"),
                None => println!("* no microphone"),
            },
            Command::Camera => match self.session.toggle_camera() {
                Some(true) => println!("* camera off"),
                Some(false) => println!("* camera on"),
                None => println!("* no camera"),
            },
            Command::Status => self.print_status(),
            Command::Files => self.print_files(),
            Command::Leave => {
                let actions = self.session.leave();
                self.apply(actions).await;
            }
        }
    }

    async fn send_file(&mut self, path: &Path) {
        let max = self.session.config().max_file_size;
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > max => {
                let err = TransferError::TooLarge {
                    size: meta.len(),
                    max,
                };
                eprintln!("cannot send {}: {err}", path.display());
                return;
            }
            Ok(meta) if !meta.is_file() => {
                eprintln!("cannot send {}: not a regular file", path.display());
                return;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("cannot send {}: {e}", path.display());
                return;
            }
        }
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                eprintln!("cannot read {}: {e}", path.display());
                return;
            }
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        let file = OutgoingFile {
            mime_type: guess_mime(&name).to_owned(),
            name,
            data,
        };
        match self.session.send_file(file) {
            Ok((file_id, actions)) => {
                tracing::debug!(file_id = %file_id, path = %path.display(), "file queued");
                self.apply(actions).await;
            }
            Err(e) => eprintln!("cannot send {}: {e}", path.display()),
        }
    }

    /// Carry out actions in order. Actions that complete synchronously feed their
    /// resulting transport event straight back into the session.
    async fn apply(&mut self, actions: Vec<OutboundAction>) {
        let mut queue: VecDeque<OutboundAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                OutboundAction::RegisterAsHost => {
                    let event = self.register_host().await;
                    queue.extend(self.session.on_transport_event(event));
                }
                OutboundAction::ConnectToHost => {
                    if let Err(e) = self.connect_to_host().await {
                        queue.extend(self.session.on_transport_event(TransportEvent::Error(e)));
                    }
                }
                OutboundAction::Send(payload) => match &self.channel {
                    Some(channel) if channel.send(payload) => {}
                    _ => tracing::debug!("no open channel, envelope dropped"),
                },
                OutboundAction::StatusChanged(status) => {
                    self.status_tx.send_replace(status);
                    println!("[{status}] {}", status.hint());
                    if status == ConnectionStatus::Waiting {
                        let token = self.session.room_token();
                        println!("* room {} is open, token: {token}", display_room_token(token));
                    }
                }
                OutboundAction::Alert(err) => eprintln!("error: {err}\n{}", err.hint()),
                OutboundAction::PeerIdentified(peer) => {
                    println!("* {} is here", peer.display_name);
                }
                OutboundAction::ChatReceived(entry) => {
                    println!("<{}> {}", entry.sender.display_name, entry.content);
                }
                OutboundAction::FileAnnounced(file_id) => {
                    if let Some(record) = self.session.transfers().get(&file_id) {
                        let meta = record.meta();
                        println!(
                            "* {} is sending {} ({})",
                            meta.sender.display_name,
                            meta.file_name,
                            format_bytes(meta.file_size_bytes)
                        );
                    }
                }
                OutboundAction::TransferProgress {
                    file_id,
                    received_bytes,
                } => tracing::trace!(file_id = %file_id, received_bytes, "chunk received"),
                OutboundAction::TransferComplete(file_id, artifact) => {
                    let direction = self.session.transfers().get(&file_id).map(|r| r.direction());
                    if let Some(path) = report_complete(&self.download_dir, direction, &artifact).await {
                        self.saved_tx.send_modify(|saved| saved.push(path));
                    }
                }
                OutboundAction::TransfersAbandoned(ids) => {
                    println!("* {} unfinished transfer(s) abandoned", ids.len());
                }
                OutboundAction::CloseMediaCall => tracing::debug!("media call closed"),
                OutboundAction::CloseChannel => {
                    if let Some(channel) = self.channel.take() {
                        channel.close();
                    }
                }
                OutboundAction::ReleaseDevices(stream) => self.media.release(&stream),
            }
        }
    }

    async fn register_host(&mut self) -> TransportEvent {
        let listener = match transport::listen(self.transport_port).await {
            Ok(l) => l,
            Err(e) => {
                let msg = format!("cannot listen on port {}: {e}", self.transport_port);
                return TransportEvent::Error(SignalingError::Other(msg));
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => return TransportEvent::Error(SignalingError::Other(e.to_string())),
        };
        let registered = self
            .rendezvous
            .register(self.session.room_token(), port, self.events_tx.clone())
            .await;
        match registered {
            Ok(registration) => {
                self.registration = Some(registration);
                self.accept_task = Some(transport::spawn_accept(listener, self.events_tx.clone()));
                TransportEvent::Registered
            }
            Err(e) => TransportEvent::Error(e),
        }
    }

    async fn connect_to_host(&mut self) -> Result<(), SignalingError> {
        let addr = self.rendezvous.resolve(self.session.room_token()).await?;
        transport::connect(addr, self.events_tx.clone())
            .await
            .map_err(|e| {
                tracing::warn!(%addr, error = %e, "host did not accept the connection");
                SignalingError::PeerUnavailable
            })
    }

    fn print_status(&self) {
        let status = self.session.status();
        let token = self.session.room_token();
        println!("room:   {} ({token})", display_room_token(token));
        println!("status: {status} ({})", status.hint());
        println!("you:    {}", self.session.local().display_name);
        println!("peer:   {}", self.session.presence().remote_label());
        println!(
            "media:  microphone {}, camera {}",
            if self.session.is_muted() { "muted" } else { "on" },
            if self.session.is_camera_off() { "off" } else { "on" },
        );
    }

    fn print_files(&self) {
        if self.session.transfers().is_empty() {
            println!("* no transfers");
            return;
        }
        for record in self.session.transfers().iter() {
            let arrow = match record.direction() {
                Direction::Outbound => "->",
                Direction::Inbound => "<-",
            };
            let state = match record.status() {
                TransferStatus::InProgress => "in progress",
                TransferStatus::Complete => "done",
                TransferStatus::Abandoned => "abandoned",
            };
            println!(
                "{arrow} {} {}/{} ({:.0}%) {state}",
                record.meta().file_name,
                format_bytes(record.received_bytes()),
                format_bytes(record.meta().file_size_bytes),
                record.progress() * 100.0
            );
        }
    }
}

/// Inbound artifacts are saved and their path returned; outbound ones only reported.
async fn report_complete(
    download_dir: &Path,
    direction: Option<Direction>,
    artifact: &ArtifactHandle,
) -> Option<PathBuf> {
    if direction != Some(Direction::Inbound) {
        println!("* sent {} ({})", artifact.file_name(), format_bytes(artifact.len()));
        return None;
    }
    match save_download(download_dir, artifact.file_name(), artifact.bytes()).await {
        Ok(path) => {
            println!(
                "* received {} ({}) -> {}",
                artifact.file_name(),
                format_bytes(artifact.len()),
                path.display()
            );
            Some(path)
        }
        Err(e) => {
            eprintln!("cannot save {}: {e}", artifact.file_name());
            None
        }
    }
}

/// Write a received file into `dir`, never outside it and never over an existing file.
pub async fn save_download(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let name = safe_file_name(file_name);
    let mut path = dir.join(&name);
    let mut n = 1;
    while tokio::fs::try_exists(&path).await? {
        path = dir.join(numbered(&name, n));
        n += 1;
    }
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

fn safe_file_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    Path::new(&name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("download")
        .to_owned()
}

/// `report.pdf` -> `report (2).pdf`
fn numbered(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDirectory;
    use duet_core::{Participant, Role, SessionError};
    use std::time::Duration;

    fn config(download_dir: &Path) -> Config {
        Config {
            chunk_size: 4_096,
            transport_port: 0,
            download_dir: download_dir.to_path_buf(),
            ..Config::default()
        }
    }

    fn runner(role: Role, token: &str, name: &str, dir: &StaticDirectory, cfg: &Config) -> Runner {
        let session = Session::with_config(role, token, Participant::local(name), cfg.session_config());
        Runner::new(
            session,
            Rendezvous::Static(dir.clone()),
            HeadlessMedia::new(true, true),
            cfg,
        )
    }

    async fn wait_for(rx: &mut watch::Receiver<ConnectionStatus>, want: ConnectionStatus) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("status in time")
            .expect("runner alive");
    }

    #[test]
    fn commands_parse() {
        assert_eq!(
            parse_command("/send  /tmp/a b.txt "),
            Some(Command::SendFile(PathBuf::from("/tmp/a b.txt")))
        );
        assert_eq!(parse_command("/send"), None);
        assert_eq!(parse_command("/mute"), Some(Command::Mute));
        assert_eq!(parse_command("/leave"), Some(Command::Leave));
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command(" hi there "), Some(Command::Chat("hi there".into())));
        assert_eq!(parse_command("/shrug"), Some(Command::Chat("/shrug".into())));
    }

    #[test]
    fn file_names_stay_inside_download_dir() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("C:\\Users\\x\\notes.txt"), "notes.txt");
        assert_eq!(safe_file_name(".."), "download");
        assert_eq!(safe_file_name(""), "download");
        assert_eq!(numbered("report.pdf", 2), "report (2).pdf");
        assert_eq!(numbered(".bashrc", 1), ".bashrc (1)");
        assert_eq!(guess_mime("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn save_download_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = save_download(dir.path(), "a.txt", b"one").await.unwrap();
        let second = save_download(dir.path(), "a.txt", b"two").await.unwrap();
        assert_eq!(first, dir.path().join("a.txt"));
        assert_eq!(second, dir.path().join("a (1).txt"));
        assert_eq!(std::fs::read(first).unwrap(), b"one");
        assert_eq!(std::fs::read(second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn joiner_without_host_gets_peer_unavailable() {
        let dir = StaticDirectory::new();
        let downloads = tempfile::tempdir().unwrap();
        let cfg = config(downloads.path());
        let joiner = runner(Role::Joiner, "empty-room-100", "Bob", &dir, &cfg);
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let session = joiner.run(cmd_rx).await.unwrap();
        assert_eq!(session.status(), ConnectionStatus::Error);
        assert_eq!(session.last_error(), Some(&SessionError::PeerUnavailable));
    }

    #[tokio::test]
    async fn taken_token_is_an_error() {
        let dir = StaticDirectory::new();
        let downloads = tempfile::tempdir().unwrap();
        let cfg = config(downloads.path());
        let first = runner(Role::Host, "busy-room-200", "Alice", &dir, &cfg);
        let mut first_status = first.status();
        let (first_cmd, first_rx) = mpsc::unbounded_channel();
        let first_task = tokio::spawn(first.run(first_rx));
        wait_for(&mut first_status, ConnectionStatus::Waiting).await;

        let second = runner(Role::Host, "busy-room-200", "Carol", &dir, &cfg);
        let (_second_cmd, second_rx) = mpsc::unbounded_channel();
        let session = second.run(second_rx).await.unwrap();
        assert_eq!(session.status(), ConnectionStatus::Error);
        assert!(matches!(session.last_error(), Some(SessionError::Signaling(_))));

        first_cmd.send(Command::Leave).unwrap();
        let first = first_task.await.unwrap().unwrap();
        assert_eq!(first.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn lost_rendezvous_ends_waiting_host() {
        let dir = StaticDirectory::new();
        let downloads = tempfile::tempdir().unwrap();
        let cfg = config(downloads.path());
        let host = runner(Role::Host, "lone-heron-512", "Alice", &dir, &cfg);
        let mut status = host.status();
        let events = host.events_tx.clone();
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(host.run(cmd_rx));
        wait_for(&mut status, ConnectionStatus::Waiting).await;

        events
            .send(LinkEvent::Transport(TransportEvent::SignalingDisconnected))
            .unwrap();
        let session = task.await.unwrap().unwrap();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.last_error().is_none());
        assert_eq!(
            Rendezvous::Static(dir).resolve("lone-heron-512").await.unwrap_err(),
            SignalingError::PeerUnavailable
        );
    }

    #[tokio::test]
    async fn host_and_joiner_share_a_file_and_chat() {
        let dir = StaticDirectory::new();
        let host_dl = tempfile::tempdir().unwrap();
        let join_dl = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let token = "quiet-lake-314";

        let host_cfg = config(host_dl.path());
        let host = runner(Role::Host, token, "Alice", &dir, &host_cfg);
        let mut host_status = host.status();
        let (host_cmd, host_rx) = mpsc::unbounded_channel();
        let host_task = tokio::spawn(host.run(host_rx));
        wait_for(&mut host_status, ConnectionStatus::Waiting).await;

        let join_cfg = config(join_dl.path());
        let joiner = runner(Role::Joiner, token, "Bob", &dir, &join_cfg);
        let mut join_status = joiner.status();
        let mut join_saved = joiner.saved();
        let (join_cmd, join_rx) = mpsc::unbounded_channel();
        let join_task = tokio::spawn(joiner.run(join_rx));
        wait_for(&mut host_status, ConnectionStatus::Connected).await;
        wait_for(&mut join_status, ConnectionStatus::Connected).await;

        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let path = source.path().join("report.bin");
        std::fs::write(&path, &data).unwrap();
        host_cmd.send(Command::SendFile(path)).unwrap();

        let received = {
            let saved = tokio::time::timeout(
                Duration::from_secs(5),
                join_saved.wait_for(|saved| !saved.is_empty()),
            )
            .await
            .expect("file delivered")
            .expect("runner alive");
            saved[0].clone()
        };
        assert_eq!(received, join_dl.path().join("report.bin"));
        assert_eq!(std::fs::read(&received).unwrap(), data);

        join_cmd.send(Command::Chat("thanks".into())).unwrap();
        join_cmd.send(Command::Leave).unwrap();
        let joiner = join_task.await.unwrap().unwrap();
        let host = host_task.await.unwrap().unwrap();

        assert_eq!(joiner.status(), ConnectionStatus::Disconnected);
        let record = joiner.transfers().iter().next().unwrap();
        assert_eq!(record.status(), TransferStatus::Complete);
        assert_eq!(record.meta().sender.display_name, "Alice");

        assert_eq!(host.status(), ConnectionStatus::Disconnected);
        let last = host.chat().entries().last().unwrap();
        assert_eq!(last.content, "thanks");
        assert_eq!(last.sender.display_name, "Bob");
        assert!(host.remote().is_none());
        drop(host_cmd);
    }
}
