mod checksum;

pub use checksum::{parse_checksum_line, sha256_file_hex, sha256_hex};
