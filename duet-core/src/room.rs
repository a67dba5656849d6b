//! Room tokens: `adjective-noun-NNN`, easy to read out loud.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: [&str; 24] = [
    "quick", "lazy", "sleepy", "noisy", "hungry", "brave", "clever", "silly", "happy", "grumpy",
    "funny", "gentle", "calm", "proud", "wise", "witty", "bright", "shiny", "dusty", "fuzzy",
    "smooth", "rough", "tiny", "giant",
];

const NOUNS: [&str; 25] = [
    "fox", "dog", "cat", "mouse", "lion", "tiger", "bear", "frog", "panda", "koala", "lemur",
    "hippo", "rhino", "zebra", "horse", "eagle", "hawk", "whale", "shark", "dolphin", "squid",
    "robot", "dragon", "wizard", "ninja",
];

/// Pick a fresh room token.
pub fn generate_room_token() -> String {
    let mut rng = rand::thread_rng();
    let adj = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quick");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("fox");
    let num: u16 = rng.gen_range(100..=999);
    format!("{adj}-{noun}-{num}")
}

/// Title-case a token for display: `swift-fox-482` → `Swift Fox 482`.
pub fn display_room_token(token: &str) -> String {
    token
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
