//! Line-oriented console that turns typed values into pin levels.

const FALSY: [&str; 5] = ["0", "false", "none", "off", "low"];

pub const BANNER: &str = "
    Welcome to GPIO console.

    Type 1, true, on or any other non-false value to turn the gpio on.

    Type 0, false, none, off or low to turn the gpio off.

    Ctrl + C to exit.
";

/// Maps one line of input to a level. Blank lines yield `None`.
pub fn parse_level(line: &str) -> Option<&'static str> {
    let value = line.trim();
    if value.is_empty() {
        return None;
    }

    let lowered = value.to_ascii_lowercase();
    let falsy = FALSY.contains(&lowered.as_str()) || value.parse::<f64>().is_ok_and(|n| n == 0.0);
    Some(if falsy { "0" } else { "1" })
}

/// Buffers raw stdin bytes and yields a level per complete line.
#[derive(Debug)]
pub struct Console {
    pin: u32,
    buffer: Vec<u8>,
}

impl Console {
    pub fn new(pin: u32) -> Self {
        Self {
            pin,
            buffer: Vec::new(),
        }
    }

    pub fn prompt(&self) -> String {
        format!(" {}> ", self.pin)
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<&'static str> {
        self.buffer.extend_from_slice(bytes);

        let mut levels = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(level) = parse_level(&String::from_utf8_lossy(&line)) {
                levels.push(level);
            }
        }
        levels
    }

    /// Flushes an unterminated last line, e.g. when stdin hits EOF.
    pub fn finish(&mut self) -> Option<&'static str> {
        let line = std::mem::take(&mut self.buffer);
        parse_level(&String::from_utf8_lossy(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_of_typed_values() {
        for on in ["1", "True", "yes", "on", "42", "high"] {
            assert_eq!(parse_level(on), Some("1"), "{on}");
        }
        for off in ["0", "FALSE", "None", "off", "low", "0.0", " 0 "] {
            assert_eq!(parse_level(off), Some("0"), "{off}");
        }
        assert_eq!(parse_level("   "), None);
    }

    #[test]
    fn feed_splits_lines_across_chunks() {
        let mut console = Console::new(18);
        assert!(console.feed(b"tr").is_empty());
        assert_eq!(console.feed(b"ue\n0\n\noff"), vec!["1", "0"]);
        assert_eq!(console.finish(), Some("0"));
        assert_eq!(console.finish(), None);
        assert_eq!(console.prompt(), " 18> ");
    }
}
