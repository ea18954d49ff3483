//! Console progress rendering.
//!
//! Every phase of a run reports through a [`Reporter`]. Lines are advisory: nothing
//! downstream parses them, but tests capture them to check what an operator would see.

use colored::Colorize;

enum Sink {
    Stdout,
    Buffer(Vec<String>),
    Quiet,
}

pub struct Reporter {
    sink: Sink,
    color: bool,
}

impl Reporter {
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout,
            color: true,
        }
    }

    /// Collects plain (uncolored) lines in memory.
    pub fn buffered() -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
            color: false,
        }
    }

    pub fn quiet() -> Self {
        Self {
            sink: Sink::Quiet,
            color: false,
        }
    }

    pub fn lines(&self) -> &[String] {
        match &self.sink {
            Sink::Buffer(lines) => lines,
            _ => &[],
        }
    }

    pub fn captured(&self) -> String {
        self.lines().join("\n")
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        match &mut self.sink {
            Sink::Stdout => println!("{}", text),
            Sink::Buffer(lines) => lines.push(text.to_string()),
            Sink::Quiet => {}
        }
    }

    pub fn blank(&mut self) {
        self.line("");
    }

    pub fn banner(&mut self, title: &str) {
        let rule = "═".repeat(46);
        if self.color {
            self.line(format!("  {}", rule.bright_yellow().bold()));
            self.line(format!("  {}", title.bright_white().bold()));
            self.line(format!("  {}", rule.bright_yellow().bold()));
        } else {
            self.line(format!("  {}", rule));
            self.line(format!("  {}", title));
            self.line(format!("  {}", rule));
        }
    }

    pub fn phase(&mut self, text: impl AsRef<str>) {
        let glyph = self.paint("▸", Tone::Cyan);
        self.line(format!("{} {}", glyph, text.as_ref()));
    }

    pub fn item(&mut self, text: impl AsRef<str>) {
        let glyph = self.paint("●", Tone::Cyan);
        self.line(format!("   {} {}", glyph, text.as_ref()));
    }

    pub fn ok(&mut self, text: impl AsRef<str>) {
        let glyph = self.paint("✓", Tone::Green);
        self.line(format!("{} {}", glyph, text.as_ref()));
    }

    pub fn warn(&mut self, text: impl AsRef<str>) {
        let glyph = self.paint("⚠", Tone::Yellow);
        self.line(format!("{} {}", glyph, text.as_ref()));
    }

    pub fn fail(&mut self, text: impl AsRef<str>) {
        let glyph = self.paint("✗", Tone::Red);
        self.line(format!("{} {}", glyph, text.as_ref()));
    }

    /// Statement text, printed verbatim so it can be copied into a SQL shell.
    pub fn statement(&mut self, sql: &str) {
        for l in sql.trim().lines() {
            self.line(format!("   {}", l.trim_end()));
        }
    }

    fn paint(&self, glyph: &str, tone: Tone) -> String {
        if !self.color {
            return glyph.to_string();
        }
        match tone {
            Tone::Cyan => glyph.bright_cyan().to_string(),
            Tone::Green => glyph.bright_green().to_string(),
            Tone::Yellow => glyph.bright_yellow().to_string(),
            Tone::Red => glyph.bright_red().bold().to_string(),
        }
    }
}

#[derive(Clone, Copy)]
enum Tone {
    Cyan,
    Green,
    Yellow,
    Red,
}

/// Collapse newlines/extra whitespace and bound length for one-line display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}
