//! 行重组
//!
//! 通道输出以任意大小的数据块到达，这里按 `\n` 切分成完整的行，
//! 未结束的部分留到下一块拼接。按字节切分，多字节字符跨块时不会被破坏

/// 行缓冲区
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块数据，返回其中已经完整的行
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.carry[start..end]));
            start = end + 1;
        }
        self.carry.drain(..start);

        lines
    }

    /// 尚未结束的残余数据
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// 流结束时取出残余的最后一行（没有残余时为 None）
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = decode_line(&self.carry);
        self.carry.clear();
        Some(line)
    }
}

// pty 输出以 \r\n 结尾
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_split_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"foo\nbar"), vec!["foo"]);
        assert_eq!(buffer.pending(), b"bar");
        assert_eq!(buffer.push(b"baz\n"), vec!["barbaz"]);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_trailing_partial_line() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"tail").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_multiple_lines_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\n\nb\nc"), vec!["a", "", "b"]);
        assert_eq!(buffer.finish().as_deref(), Some("c"));
    }

    #[test]
    fn test_crlf_from_pty() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"one\r\ntwo\r"), vec!["one"]);
        assert_eq!(buffer.push(b"\n"), vec!["two"]);
    }

    #[test]
    fn test_multibyte_char_split_between_chunks() {
        let text = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..2]).is_empty());
        assert_eq!(buffer.push(&text[2..]), vec!["héllo"]);
    }
}
