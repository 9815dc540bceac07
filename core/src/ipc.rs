use room_api::Envelope;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::bridge::BridgeError;

/// Read a single line-delimited JSON envelope from the reader.
pub async fn read_envelope<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Envelope, BridgeError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(BridgeError::Closed);
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Write a single envelope as line-delimited JSON to the writer.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    env: &Envelope,
) -> Result<(), BridgeError> {
    let s = serde_json::to_string(env)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn envelopes_are_line_delimited() {
        let mut buf = Vec::new();
        let first = Envelope::request("1", "room.state", json!({"room_id": "!a:x"}));
        let second = Envelope::event("room.event", json!({}));
        write_envelope(&mut buf, &first).await.unwrap();
        write_envelope(&mut buf, &second).await.unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 2);

        let mut reader = BufReader::new(&buf[..]);
        assert_eq!(read_envelope(&mut reader).await.unwrap(), first);
        assert_eq!(read_envelope(&mut reader).await.unwrap(), second);
        assert!(matches!(
            read_envelope(&mut reader).await,
            Err(BridgeError::Closed)
        ));
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        assert!(matches!(
            read_envelope(&mut reader).await,
            Err(BridgeError::Decode(_))
        ));
    }
}
