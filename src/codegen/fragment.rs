/// Generated source as indented lines, flattened only at the end.
#[derive(Debug, Clone)]
pub struct SourceFragment {
    lines: Vec<String>,
    level: usize,
    width: usize,
}

impl SourceFragment {
    pub fn new(width: usize) -> Self {
        Self { lines: Vec::new(), level: 0, width }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn dedent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    /// Start a new line at the current indentation.
    pub fn push_line(&mut self, text: &str) {
        let mut line = " ".repeat(self.level * self.width);
        line.push_str(text);
        self.lines.push(line);
    }

    /// Continue the last line (e.g. closing parentheses).
    pub fn append(&mut self, text: &str) {
        match self.lines.last_mut() {
            Some(line) => line.push_str(text),
            None => self.push_line(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_string(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_their_indentation() {
        let mut f = SourceFragment::new(2);
        f.push_line("a(");
        f.indent();
        f.push_line(".b()");
        f.append(")");
        f.dedent();
        f.dedent();
        assert_eq!(f.level(), 0);
        f.push_line("c");
        assert_eq!(f.into_string(), "a(\n  .b())\nc\n");
    }
}
