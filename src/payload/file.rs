//! Payload files
//!
//! A payload file is a plain concatenation of payloads. Each payload starts
//! with its own big-endian u32 length (which includes the length field), so
//! the file needs no framing of its own.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::common::{bytes, Endian, PayloadError, PayloadResult};

/// Upper bound on a single payload, to reject garbage length fields early
pub const MAX_PAYLOAD_SIZE: usize = 100_000_000;

/// Iterator over the payloads of a stream
pub struct PayloadFileReader<R> {
    reader: R,
    offset: u64,
    done: bool,
}

impl PayloadFileReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> PayloadResult<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> PayloadFileReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next payload
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill `buf`, returning how many bytes were read before EOF
    fn read_full(&mut self, buf: &mut [u8]) -> PayloadResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn read_payload(&mut self) -> PayloadResult<Option<Vec<u8>>> {
        let mut prefix = [0u8; 4];
        match self.read_full(&mut prefix)? {
            0 => return Ok(None),
            4 => {}
            n => {
                return Err(PayloadError::format(format!(
                    "truncated payload length at file offset {} ({} bytes)",
                    self.offset, n
                )))
            }
        }

        let length = u32::from_be_bytes(prefix) as usize;
        if !(8..=MAX_PAYLOAD_SIZE).contains(&length) {
            return Err(PayloadError::format(format!(
                "payload at file offset {} declares {} bytes",
                self.offset, length
            )));
        }

        let mut payload = vec![0u8; length];
        payload[..4].copy_from_slice(&prefix);
        let got = self.read_full(&mut payload[4..])?;
        if got != length - 4 {
            return Err(PayloadError::format(format!(
                "payload at file offset {} truncated: {} of {} bytes",
                self.offset,
                got + 4,
                length
            )));
        }

        self.offset += length as u64;
        Ok(Some(payload))
    }
}

impl<R: Read> Iterator for PayloadFileReader<R> {
    type Item = PayloadResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_payload() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Writes payloads back to back
pub struct PayloadFileWriter<W: Write> {
    writer: W,
    payloads: u64,
    bytes: u64,
}

impl PayloadFileWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> PayloadResult<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> PayloadFileWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            payloads: 0,
            bytes: 0,
        }
    }

    /// Append one payload; its length field must match its size
    pub fn write_payload(&mut self, payload: &[u8]) -> PayloadResult<()> {
        let declared = bytes::read::<u32>(Endian::Big, 0, payload)?;
        if declared as usize != payload.len() {
            return Err(PayloadError::format(format!(
                "payload declares {} bytes but holds {}",
                declared,
                payload.len()
            )));
        }
        self.writer.write_all(payload)?;
        self.payloads += 1;
        self.bytes += payload.len() as u64;
        Ok(())
    }

    pub fn payloads_written(&self) -> u64 {
        self.payloads
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> PayloadResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payload(len: usize, fill: u8) -> Vec<u8> {
        let mut p = vec![fill; len];
        p[..4].copy_from_slice(&(len as u32).to_be_bytes());
        p
    }

    #[test]
    fn test_write_read() {
        let mut writer = PayloadFileWriter::new(Vec::new());
        writer.write_payload(&payload(12, 1)).unwrap();
        writer.write_payload(&payload(40, 2)).unwrap();
        assert_eq!(writer.payloads_written(), 2);
        assert_eq!(writer.bytes_written(), 52);
        let data = writer.finish().unwrap();

        let payloads: Vec<_> = PayloadFileReader::new(Cursor::new(data))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(payloads, vec![payload(12, 1), payload(40, 2)]);
    }

    #[test]
    fn test_empty_file() {
        let mut reader = PayloadFileReader::new(Cursor::new(Vec::new()));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_payload() {
        let mut data = payload(20, 1);
        data.extend(payload(30, 2));
        data.truncate(45);

        let mut reader = PayloadFileReader::new(Cursor::new(data));
        assert!(reader.next().unwrap().is_ok());
        assert_eq!(reader.offset(), 20);
        assert!(matches!(reader.next(), Some(Err(PayloadError::Format(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_length_prefix() {
        let mut data = payload(20, 1);
        data.extend_from_slice(&[0, 0]);
        let results: Vec<_> = PayloadFileReader::new(Cursor::new(data)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_bad_length() {
        let data = vec![0, 0, 0, 4, 0, 0, 0, 0];
        let mut reader = PayloadFileReader::new(Cursor::new(data));
        assert!(matches!(reader.next(), Some(Err(PayloadError::Format(_)))));
    }

    #[test]
    fn test_writer_rejects_inconsistent_length() {
        let mut p = payload(16, 0);
        p.push(0);
        let mut writer = PayloadFileWriter::new(Vec::new());
        assert!(writer.write_payload(&p).is_err());
        assert!(writer.write_payload(&[0, 0]).is_err());
    }
}
