use rand::{seq::SliceRandom, Rng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Number of words in a generated recovery key.
pub const RECOVERY_KEY_WORDS: usize = 8;

const WORDS: [&str; 256] = [
    "acid", "acorn", "actor", "adobe", "agent", "alarm", "album", "alley", "amber", "anchor",
    "angle", "ankle", "apple", "apron", "arena", "arrow", "aspen", "atlas", "attic", "audio",
    "badge", "bagel", "baker", "bamboo", "banjo", "barn", "basin", "beach", "beard", "bench",
    "berry", "bison", "blade", "blaze", "bloom", "board", "bonus", "boots", "brick", "bride",
    "brook", "brush", "bucket", "bugle", "cabin", "cable", "cactus", "camel", "candle", "canoe",
    "canyon", "cargo", "carpet", "castle", "cedar", "chalk", "cherry", "chess", "cider", "cinema",
    "circus", "citrus", "clover", "cobalt", "cocoa", "comet", "copper", "coral", "cotton", "crane",
    "crater", "crayon", "cricket", "crown", "crystal", "cube", "daisy", "dance", "delta", "denim",
    "desert", "diary", "dingo", "dolphin", "donkey", "dragon", "drum", "dune", "eagle", "easel",
    "echo", "eclipse", "elbow", "elder", "ember", "emerald", "engine", "fabric", "falcon", "feather",
    "fence", "fern", "ferry", "fiddle", "fjord", "flame", "flute", "forest", "fossil", "fox",
    "galaxy", "garden", "garlic", "gecko", "geyser", "ginger", "glacier", "globe", "goblet", "grape",
    "gravel", "guitar", "hammer", "harbor", "harvest", "hazel", "helmet", "heron", "hickory", "honey",
    "horizon", "icicle", "igloo", "indigo", "island", "ivory", "jacket", "jaguar", "jasmine", "jelly",
    "jigsaw", "jungle", "kayak", "kernel", "kettle", "kiwi", "koala", "ladder", "lagoon", "lantern",
    "laser", "lemon", "lilac", "lizard", "lobster", "locket", "lotus", "lumber", "magnet", "mango",
    "maple", "marble", "meadow", "melon", "meteor", "mirror", "mitten", "monsoon", "mosaic", "muffin",
    "napkin", "nectar", "needle", "nickel", "nutmeg", "oasis", "ocean", "olive", "onion", "orbit",
    "orchid", "otter", "oyster", "paddle", "palace", "panda", "papaya", "parrot", "pebble", "pepper",
    "piano", "pillow", "pine", "planet", "plum", "pocket", "polar", "pony", "poppy", "prairie",
    "prism", "puzzle", "quartz", "quill", "quiver", "rabbit", "radar", "raft", "rain", "raven",
    "reef", "ribbon", "river", "robin", "rocket", "saddle", "salmon", "satin", "scarf", "shadow",
    "shell", "silk", "sketch", "sled", "socket", "spice", "spruce", "squid", "statue", "summit",
    "sunset", "swan", "tablet", "tango", "teapot", "thistle", "thunder", "tiger", "timber", "tulip",
    "tundra", "turtle", "umbrella", "valley", "velvet", "violet", "volcano", "wagon", "walnut", "whale",
    "willow", "window", "winter", "yacht", "zebra", "zephyr",
];

pub async fn hash_password(password: &str, cost: u32) -> Result<String, CryptoError> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(valid)
}

/// 256 bits from the thread RNG, hex encoded.
fn random_hex_256() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn generate_session_token() -> String {
    random_hex_256()
}

/// Key handed to the client for encrypting event payloads. The server only
/// stores and returns it.
pub fn generate_encryption_key() -> String {
    random_hex_256()
}

pub fn generate_recovery_key() -> String {
    let mut rng = rand::thread_rng();
    (0..RECOVERY_KEY_WORDS)
        .filter_map(|_| WORDS.choose(&mut rng).copied())
        .collect::<Vec<_>>()
        .join("-")
}

/// Byte-wise comparison that does not stop at the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn word_list_has_no_duplicates() {
        let unique: HashSet<_> = WORDS.iter().collect();
        assert_eq!(unique.len(), WORDS.len());
        assert!(WORDS
            .iter()
            .all(|w| w.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn recovery_key_is_eight_hyphenated_words() {
        let key = generate_recovery_key();
        let parts: Vec<_> = key.split('-').collect();
        assert_eq!(parts.len(), RECOVERY_KEY_WORDS);
        assert!(parts.iter().all(|p| WORDS.contains(p)));
    }

    #[test]
    fn tokens_are_64_hex_chars_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(generate_encryption_key().len(), 64);
    }

    #[test]
    fn constant_time_eq_matches_plain_eq() {
        assert!(constant_time_eq("lotus-river", "lotus-river"));
        assert!(!constant_time_eq("lotus-river", "lotus-rivet"));
        assert!(!constant_time_eq("lotus", "lotus-river"));
    }

    #[tokio::test]
    async fn hash_round_trip() {
        let hash = hash_password("Secret123!", 4).await.unwrap();
        assert!(verify_password("Secret123!", &hash).await.unwrap());
        assert!(!verify_password("secret123!", &hash).await.unwrap());
    }
}
