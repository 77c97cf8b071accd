/// Where every newline in a text is, for turning byte offsets into lines and columns.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &[u8]) -> LineIndex {
        LineIndex {
            newlines: memchr::memchr_iter(b'\n', text).collect(),
        }
    }

    /// 1-indexed line and column of a byte offset.
    ///
    /// A newline belongs to the line it ends.
    pub fn line_col(&self, pos: usize) -> (usize, usize) {
        let before = self.newlines.partition_point(|&nl| nl < pos);
        match before.checked_sub(1) {
            None => (1, pos + 1),
            Some(last) => (before + 1, pos - self.newlines[last]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn simple() {
        let index = LineIndex::new(b"ab\ncd\n\nef");
        assert_eq!(index.line_col(0), (1, 1));
        assert_eq!(index.line_col(2), (1, 3));
        assert_eq!(index.line_col(3), (2, 1));
        assert_eq!(index.line_col(5), (2, 3));
        assert_eq!(index.line_col(6), (3, 1));
        assert_eq!(index.line_col(7), (4, 1));
        assert_eq!(index.line_col(9), (4, 3));
    }

    fn naive(text: &[u8], pos: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for &b in &text[..pos] {
            if b == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    quickcheck! {
        fn prop_matches_naive(text: Vec<u8>, pos: usize) -> bool {
            let text: Vec<u8> = text.into_iter().map(|b| if b % 4 == 0 { b'\n' } else { b }).collect();
            let pos = pos % (text.len() + 1);
            LineIndex::new(&text).line_col(pos) == naive(&text, pos)
        }
    }
}
