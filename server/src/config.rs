use std::path::PathBuf;

pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

pub fn server_port() -> u16 {
    std::env::var("SERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

pub fn sse_broadcast_buffer() -> usize {
    std::env::var("SSE_BROADCAST_BUFFER")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

/// JSON file with `profiles` and `locations` loaded at startup.
pub fn seed_file() -> Option<PathBuf> {
    std::env::var("GLOBE_SEED_FILE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_falls_back_on_garbage() {
        temp_env::with_var("SERVER_PORT", Some("not-a-port"), || {
            assert_eq!(server_port(), DEFAULT_SERVER_PORT);
        });
        temp_env::with_var("SERVER_PORT", Some("0"), || {
            assert_eq!(server_port(), DEFAULT_SERVER_PORT);
        });
        temp_env::with_var("SERVER_PORT", Some("8088"), || {
            assert_eq!(server_port(), 8088);
        });
    }

    #[test]
    fn broadcast_buffer_must_be_positive() {
        temp_env::with_var("SSE_BROADCAST_BUFFER", Some("0"), || {
            assert_eq!(sse_broadcast_buffer(), DEFAULT_BROADCAST_BUFFER);
        });
        temp_env::with_var("SSE_BROADCAST_BUFFER", Some("1024"), || {
            assert_eq!(sse_broadcast_buffer(), 1024);
        });
    }

    #[test]
    fn blank_seed_file_is_ignored() {
        temp_env::with_var("GLOBE_SEED_FILE", Some("  "), || {
            assert_eq!(seed_file(), None);
        });
        temp_env::with_var("GLOBE_SEED_FILE", Some("/tmp/seed.json"), || {
            assert_eq!(seed_file(), Some(PathBuf::from("/tmp/seed.json")));
        });
    }
}
