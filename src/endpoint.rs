//! Delivery targets for relayed text.
//!
//! The relay core only needs an identity and the ability to deliver one line.
//! [`crate::tmux::TmuxPane`] is the production endpoint.

use anyhow::Result;

pub trait Endpoint {
    /// Stable identity used in logs (for tmux, the pane id like `%3`).
    fn id(&self) -> &str;

    /// Type `line` into the endpoint and submit it.
    fn deliver_line(&self, line: &str) -> Result<()>;
}

/// Deliver every line of `text` in order.
pub fn deliver_text(endpoint: &dyn Endpoint, text: &str) -> Result<usize> {
    let mut count = 0;
    for line in text.split('\n') {
        endpoint.deliver_line(line)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::{Result, bail};

    use super::Endpoint;

    /// Endpoint that records delivered lines.
    #[derive(Clone, Default)]
    pub struct RecordingEndpoint {
        pub id: String,
        pub lines: Rc<RefCell<Vec<String>>>,
        pub fail: bool,
    }

    impl RecordingEndpoint {
        pub fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                ..Self::default()
            }
        }

        pub fn failing(id: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(id)
            }
        }

        pub fn delivered(&self) -> Vec<String> {
            self.lines.borrow().clone()
        }
    }

    impl Endpoint for RecordingEndpoint {
        fn id(&self) -> &str {
            &self.id
        }

        fn deliver_line(&self, line: &str) -> Result<()> {
            if self.fail {
                bail!("endpoint {} is gone", self.id);
            }
            self.lines.borrow_mut().push(line.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingEndpoint;
    use super::*;

    #[test]
    fn deliver_text_sends_each_line() {
        let endpoint = RecordingEndpoint::new("%1");
        let count = deliver_text(&endpoint, "a\n\nb").unwrap();
        assert_eq!(count, 3);
        assert_eq!(endpoint.delivered(), vec!["a", "", "b"]);
    }

    #[test]
    fn deliver_text_stops_at_first_failure() {
        let endpoint = RecordingEndpoint::failing("%2");
        assert!(deliver_text(&endpoint, "a\nb").is_err());
    }
}
