//! Low-level wire primitives: the length-prefixed "BinaryWriter" convention
//! of spec §4.7 — length-prefixed UTF-8 strings, length-prefixed byte
//! buffers, and fixed-width integers/bools, all big-endian for cross-
//! platform determinism (both ends must agree; this codebase picks
//! big-endian throughout, mirroring the teacher's `to_be_bytes` framing in
//! `transport.rs`'s ping/pong control messages).
use crate::error::{Result, SwarmError};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn write_string<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    w.write_all(bytes).await?;
    Ok(())
}

pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> Result<String> {
    let len = read_u32(r).await? as usize;
    if len > max_len {
        return Err(SwarmError::Protocol(format!(
            "string length {len} exceeds max {max_len}"
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| SwarmError::Protocol(format!("invalid UTF-8: {e}")))
}

pub async fn write_bytes<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    w.write_all(&(data.len() as i32).to_be_bytes()).await?;
    w.write_all(data).await?;
    Ok(())
}

pub async fn read_bytes<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let len = read_i32(r).await?;
    if len < 0 {
        return Err(SwarmError::Protocol("negative byte-buffer length".into()));
    }
    let len = len as usize;
    if len > max_len {
        return Err(SwarmError::Protocol(format!(
            "byte buffer length {len} exceeds max {max_len}"
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

pub async fn write_i32<W: AsyncWrite + Unpin>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(i32::from_be_bytes(buf))
}

pub async fn write_i64<W: AsyncWrite + Unpin>(w: &mut W, v: i64) -> Result<()> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_i64<R: AsyncRead + Unpin>(r: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await?;
    Ok(i64::from_be_bytes(buf))
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_be_bytes()).await?;
    Ok(())
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}

pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, v: bool) -> Result<()> {
    w.write_all(&[v as u8]).await?;
    Ok(())
}

pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).await?;
    Ok(buf[0] != 0)
}

pub async fn write_u8<W: AsyncWrite + Unpin>(w: &mut W, v: u8) -> Result<()> {
    w.write_all(&[v]).await?;
    Ok(())
}

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).await?;
    Ok(buf[0])
}

/// `ERROR:<reason>` sentinel used to reject a connection on a protocol error.
pub async fn write_error_sentinel<W: AsyncWrite + Unpin>(w: &mut W, reason: &str) -> io::Result<()> {
    let line = format!("ERROR:{reason}");
    w.write_all(&(line.len() as u32).to_be_bytes()).await?;
    w.write_all(line.as_bytes()).await
}
