//! Randomly seekable read streams over remote resources.
//!
//! A [`BufferedTransferStream`] pulls bytes from a non-blocking HTTP
//! transfer only as far as reads and seeks require, so large images or
//! archives can be inspected without downloading them first.
//!
//! ```no_run
//! use urlstream::load_url_stream;
//!
//! let mut stream = load_url_stream("https://example.com/picture.png")
//!     .expect("could not open stream");
//! let mut magic = [0u8; 8];
//! stream.read_exact(&mut magic)?;
//! println!("{:?} bytes total", stream.size()?);
//! # Ok::<(), urlstream::StreamError>(())
//! ```

mod buffer;
mod config;
pub mod engine;
mod errors;
mod session;
mod stream;

pub use buffer::TransferBuffer;
pub use config::StreamConfig;
pub use engine::{Credentials, TransferRequest};
pub use errors::{Result, StreamError};
pub use session::TransferSession;
pub use stream::{BufferedTransferStream, Phase};

/// Open `url` without authentication. Failures are logged and reported
/// as `None`.
pub fn load_url_stream(url: &str) -> Option<BufferedTransferStream> {
    load_url_stream_with_credentials(url, "", "")
}

/// Open `url` using basic authentication when `user` or `password` is
/// not empty. Failures are logged and reported as `None`.
pub fn load_url_stream_with_credentials(
    url: &str,
    user: &str,
    password: &str,
) -> Option<BufferedTransferStream> {
    let credentials = Credentials::from_parts(user, password);
    match BufferedTransferStream::open(url, credentials) {
        Ok(stream) => Some(stream),
        Err(e) => {
            log::warn!("stream/{}: could not open: {}", url, e);
            None
        }
    }
}
