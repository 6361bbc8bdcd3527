use std::io::{self, BufRead};

/// Line iterator that survives bytes that aren't valid UTF-8.
///
/// Invalid sequences are replaced rather than failing the whole file, and
/// the trailing `\n` / `\r\n` is stripped.
pub struct Lines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> Lines<R> {
    pub fn new(reader: R) -> Self {
        Lines {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines() {
        let data = b"one\r\ntwo\n\nthree";
        let lines: Vec<String> = Lines::new(&data[..]).map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn invalid_utf8() {
        let data = b"ok\n\xff\xfebad\n";
        let lines: Vec<String> = Lines::new(&data[..]).map(|l| l.unwrap()).collect();
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with("bad"));
    }
}
