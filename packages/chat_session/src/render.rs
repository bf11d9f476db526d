//! Incremental terminal rendering of the message log.
//!
//! The renderer remembers how much of the log it has already written, so
//! each redraw only prints new messages and the growth of a streaming reply.

use crate::message::{Direction, Message};

const CLEARED_MARKER: &str = "-- conversation cleared --";

#[derive(Debug, Default)]
pub struct LogRenderer {
    epoch: Option<u64>,
    printed: usize,
    last_len: usize,
    line_open: bool,
}

pub fn format_header(message: &Message) -> String {
    let arrow = match message.direction {
        Direction::Sent => '>',
        Direction::Received => '<',
    };
    format!("[{}] {} ", message.timestamp, arrow)
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write for the current state of the log.
    pub fn render(&mut self, epoch: u64, messages: &[Message]) -> String {
        let mut out = String::new();

        match self.epoch {
            Some(seen) if seen != epoch => {
                self.close_line(&mut out);
                out.push_str(CLEARED_MARKER);
                out.push('\n');
                self.printed = 0;
                self.last_len = 0;
            }
            _ => {}
        }
        self.epoch = Some(epoch);

        // The newest message may have grown since the last redraw
        if self.printed > 0 {
            if let Some(last) = messages.get(self.printed - 1) {
                if last.content.len() > self.last_len && last.content.is_char_boundary(self.last_len)
                {
                    out.push_str(&last.content[self.last_len..]);
                }
            }
        }

        for message in messages.iter().skip(self.printed) {
            self.close_line(&mut out);
            out.push_str(&format_header(message));
            out.push_str(&message.content);
            self.line_open = true;
        }

        self.printed = messages.len();
        self.last_len = messages.last().map(|m| m.content.len()).unwrap_or(0);
        out
    }

    fn close_line(&mut self, out: &mut String) {
        if self.line_open {
            out.push('\n');
            self.line_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, direction: Direction) -> Message {
        Message {
            content: content.to_string(),
            direction,
            timestamp: "12:00:00".to_string(),
        }
    }

    #[test]
    fn new_messages_get_headers() {
        let mut renderer = LogRenderer::new();
        let log = vec![msg("hi", Direction::Sent), msg("hello", Direction::Received)];
        assert_eq!(
            renderer.render(0, &log),
            "[12:00:00] > hi\n[12:00:00] < hello"
        );
        // Nothing changed, nothing printed
        assert_eq!(renderer.render(0, &log), "");
    }

    #[test]
    fn streaming_growth_prints_only_the_suffix() {
        let mut renderer = LogRenderer::new();
        let mut log = vec![msg("q", Direction::Sent), msg("", Direction::Received)];
        renderer.render(0, &log);

        log[1].content.push_str("The ");
        assert_eq!(renderer.render(0, &log), "The ");
        log[1].content.push_str("answer");
        assert_eq!(renderer.render(0, &log), "answer");

        log.push(msg("thanks", Direction::Sent));
        assert_eq!(renderer.render(0, &log), "\n[12:00:00] > thanks");
    }

    #[test]
    fn growth_and_new_message_in_one_redraw() {
        let mut renderer = LogRenderer::new();
        let mut log = vec![msg("part", Direction::Received)];
        renderer.render(0, &log);

        log[0].content.push_str("ial");
        log.push(msg("error", Direction::Received));
        assert_eq!(renderer.render(0, &log), "ial\n[12:00:00] < error");
    }

    #[test]
    fn epoch_change_marks_clear_and_restarts() {
        let mut renderer = LogRenderer::new();
        renderer.render(0, &[msg("old", Direction::Sent)]);

        let out = renderer.render(1, &[msg("welcome", Direction::Received)]);
        assert_eq!(
            out,
            "\n-- conversation cleared --\n[12:00:00] < welcome"
        );
    }

    #[test]
    fn first_render_has_no_clear_marker() {
        let mut renderer = LogRenderer::new();
        let out = renderer.render(7, &[msg("welcome", Direction::Received)]);
        assert_eq!(out, "[12:00:00] < welcome");
    }
}
