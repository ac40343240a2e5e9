use crate::error::User;
use crate::proto::h1::io::Buffered;
use crate::rt::Transport;

/// Encodes an outgoing request body into the write buffer.
#[derive(Debug)]
pub(crate) struct Encoder {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    /// A `Content-Length` body: counts what is written and `finish`
    /// verifies the total.
    Length { remaining: u64 },
    /// A chunked body: every non-empty write becomes one chunk frame.
    Chunked,
}

impl Encoder {
    pub(crate) fn length(len: u64) -> Encoder {
        Encoder {
            kind: Kind::Length { remaining: len },
        }
    }

    pub(crate) fn chunked() -> Encoder {
        Encoder {
            kind: Kind::Chunked,
        }
    }

    pub(crate) async fn write_chunk<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
        data: &[u8],
    ) -> crate::Result<()> {
        if data.is_empty() {
            // An empty chunk frame would terminate the body early.
            return Ok(());
        }
        match self.kind {
            Kind::Length { ref mut remaining } => {
                let len = data.len() as u64;
                if len > *remaining {
                    return Err(crate::Error::new_user(User::BodyLengthMismatch));
                }
                *remaining -= len;
                io.write_bytes(data).await
            }
            Kind::Chunked => {
                io.write_hex(data.len() as u64).await?;
                io.write_crlf().await?;
                io.write_bytes(data).await?;
                io.write_crlf().await
            }
        }
    }

    pub(crate) async fn finish<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
    ) -> crate::Result<()> {
        match self.kind {
            Kind::Length { remaining } => {
                if remaining != 0 {
                    return Err(crate::Error::new_user(User::BodyLengthMismatch));
                }
                Ok(())
            }
            Kind::Chunked => io.write_bytes(b"0\r\n\r\n").await,
        }
    }
}
