//! Single-line input editor: byte-indexed cursor kept on UTF-8 boundaries,
//! word motions, and Up/Down recall through the prompt history.
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Default)]
pub struct InputLine {
    text: String,
    /// Byte offset, always on a char boundary.
    cursor: usize,
    /// Index into the prompt history while recalling; `None` when editing.
    recall: Option<usize>,
    /// What was typed before recall started, restored when walking past the newest entry.
    draft: String,
}

impl InputLine {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Terminal columns between the start of the line and the cursor.
    pub fn cursor_col(&self) -> usize {
        self.text[..self.cursor].width()
    }

    pub fn insert_char(&mut self, c: char) {
        self.text.insert(self.cursor, c);
        self.cursor += c.len_utf8();
        self.recall = None;
    }

    pub fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
        self.recall = None;
    }

    /// Replace the whole line, cursor at the end.
    pub fn set(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.text.len();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
        self.recall = None;
        self.draft.clear();
    }

    /// Empty the line and hand back what was in it.
    pub fn take(&mut self) -> String {
        let out = std::mem::take(&mut self.text);
        self.clear();
        out
    }

    pub fn backspace(&mut self) {
        input_backspace(&mut self.text, &mut self.cursor);
    }

    pub fn delete_forward(&mut self) {
        input_delete_forward(&mut self.text, &mut self.cursor);
    }

    pub fn delete_word(&mut self) {
        input_delete_word(&mut self.text, &mut self.cursor);
    }

    /// Ctrl+U: drop everything before the cursor.
    pub fn delete_to_start(&mut self) {
        self.text.drain(..self.cursor);
        self.cursor = 0;
    }

    pub fn left(&mut self) {
        self.cursor = prev_char_boundary(&self.text, self.cursor);
    }

    pub fn right(&mut self) {
        self.cursor = next_char_boundary(&self.text, self.cursor);
    }

    pub fn word_left(&mut self) {
        self.cursor = word_left(&self.text, self.cursor);
    }

    pub fn word_right(&mut self) {
        self.cursor = word_right(&self.text, self.cursor);
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.len();
    }

    /// Up: step to the next older history entry. `entries` is oldest first.
    pub fn recall_prev(&mut self, entries: &[String]) -> bool {
        if entries.is_empty() {
            return false;
        }
        let idx = match self.recall {
            None => {
                self.draft = self.text.clone();
                entries.len() - 1
            }
            Some(0) => return false,
            Some(i) => i - 1,
        };
        self.recall = Some(idx);
        self.set(&entries[idx]);
        true
    }

    /// Down: step towards the newest entry, then back to the draft.
    pub fn recall_next(&mut self, entries: &[String]) -> bool {
        let Some(i) = self.recall else {
            return false;
        };
        if i + 1 < entries.len() {
            self.recall = Some(i + 1);
            self.set(&entries[i + 1]);
        } else {
            self.recall = None;
            let draft = std::mem::take(&mut self.draft);
            self.set(&draft);
        }
        true
    }
}

// ── Editing helpers ───────────────────────────────────────────────────────────

/// Remove the character immediately before the cursor (UTF-8 safe).
fn input_backspace(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let prev = prev_char_boundary(input, *cursor);
    input.drain(prev..*cursor);
    *cursor = prev;
}

/// Delete the character at the cursor position.
fn input_delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor >= input.len() {
        return;
    }
    let next = next_char_boundary(input, *cursor);
    input.drain(*cursor..next);
}

/// Delete the word immediately before the cursor (stops at whitespace boundary).
fn input_delete_word(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let start = word_left(input, *cursor);
    input.drain(start..*cursor);
    *cursor = start;
}

fn prev_char_boundary(s: &str, pos: usize) -> usize {
    if pos == 0 {
        return 0;
    }
    let mut p = pos - 1;
    while !s.is_char_boundary(p) {
        p -= 1;
    }
    p
}

fn next_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut p = pos + 1;
    while p <= s.len() && !s.is_char_boundary(p) {
        p += 1;
    }
    p.min(s.len())
}

/// Start of the previous word: skip spaces, then the word.
fn word_left(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    while pos > 0 && !bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    pos
}

fn word_right(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    let len = s.len();
    while pos < len && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    while pos < len && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> InputLine {
        let mut l = InputLine::default();
        l.set(text);
        l
    }

    #[test]
    fn test_multibyte_editing() {
        let mut l = line("héllo");
        l.left();
        l.left();
        l.left();
        l.backspace();
        assert_eq!(l.as_str(), "hllo");
        assert_eq!(l.cursor(), 1);
        l.insert_char('é');
        assert_eq!(l.as_str(), "héllo");
        l.delete_forward();
        assert_eq!(l.as_str(), "hélo");
    }

    #[test]
    fn test_word_motions_and_delete_word() {
        let mut l = line("plan the  thing");
        l.word_left();
        assert_eq!(l.cursor(), 10);
        l.word_left();
        assert_eq!(l.cursor(), 5);
        l.word_right();
        assert_eq!(l.cursor(), 8);
        l.end();
        l.delete_word();
        assert_eq!(l.as_str(), "plan the  ");
        l.delete_to_start();
        assert!(l.is_empty());
    }

    #[test]
    fn test_cursor_col_counts_wide_chars() {
        let l = line("日本");
        assert_eq!(l.cursor_col(), 4);
    }

    #[test]
    fn test_history_recall_restores_draft() {
        let hist = vec!["first".to_string(), "second".to_string()];
        let mut l = line("dra");
        assert!(l.recall_prev(&hist));
        assert_eq!(l.as_str(), "second");
        assert!(l.recall_prev(&hist));
        assert_eq!(l.as_str(), "first");
        assert!(!l.recall_prev(&hist));
        assert!(l.recall_next(&hist));
        assert_eq!(l.as_str(), "second");
        assert!(l.recall_next(&hist));
        assert_eq!(l.as_str(), "dra");
        assert!(!l.recall_next(&hist));
    }

    #[test]
    fn test_take_clears() {
        let mut l = line("hello");
        assert_eq!(l.take(), "hello");
        assert!(l.is_empty());
        assert_eq!(l.cursor(), 0);
    }
}
