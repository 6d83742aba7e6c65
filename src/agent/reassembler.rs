use crate::error::RelayError;

/// A tool call whose arguments are still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Collects tool-call fragments of one response.
///
/// A fragment with an id opens a new draft; fragments without one extend the
/// most recently opened draft.
#[derive(Debug, Default)]
pub struct ToolCallReassembler {
    drafts: Vec<DraftToolCall>,
    cursor: Option<usize>,
    opened: bool,
}

impl ToolCallReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedStream`] for a continuation fragment
    /// that arrives before any draft was opened.
    pub fn push_fragment(
        &mut self,
        id: Option<String>,
        name: Option<String>,
        arguments: &str,
    ) -> Result<(), RelayError> {
        if let Some(id) = id {
            self.drafts.push(DraftToolCall {
                id,
                name: name.unwrap_or_default(),
                arguments: arguments.to_string(),
            });
            self.cursor = Some(self.drafts.len() - 1);
            self.opened = true;
            return Ok(());
        }

        let draft = self
            .cursor
            .and_then(|index| self.drafts.get_mut(index))
            .ok_or_else(|| {
                RelayError::MalformedStream(
                    "tool-call continuation fragment without an open tool call".to_string(),
                )
            })?;
        draft.arguments.push_str(arguments);
        Ok(())
    }

    /// Whether any draft was opened in this response, including drafts that
    /// were already taken.
    #[must_use]
    pub fn has_drafts(&self) -> bool {
        self.opened
    }

    #[must_use]
    pub fn pending(&self) -> &[DraftToolCall] {
        &self.drafts
    }

    /// Drain the drafts collected so far, in opening order.
    pub fn take_batch(&mut self) -> Vec<DraftToolCall> {
        self.cursor = None;
        std::mem::take(&mut self.drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembles_split_arguments() {
        let mut r = ToolCallReassembler::new();
        r.push_fragment(Some("call_1".into()), Some("get_current_weather".into()), "")
            .unwrap();
        for piece in ["{\"lat", "itude\":", "40.7}"] {
            r.push_fragment(None, None, piece).unwrap();
        }
        assert_eq!(
            r.pending(),
            &[DraftToolCall {
                id: "call_1".into(),
                name: "get_current_weather".into(),
                arguments: "{\"latitude\":40.7}".into(),
            }]
        );
    }

    #[test]
    fn test_continuations_extend_latest_draft() {
        let mut r = ToolCallReassembler::new();
        r.push_fragment(Some("a".into()), Some("t1".into()), "{\"x\":")
            .unwrap();
        r.push_fragment(None, None, "1}").unwrap();
        r.push_fragment(Some("b".into()), Some("t2".into()), "").unwrap();
        r.push_fragment(None, None, "{}").unwrap();

        let batch = r.take_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "a");
        assert_eq!(batch[0].arguments, "{\"x\":1}");
        assert_eq!(batch[1].id, "b");
        assert_eq!(batch[1].arguments, "{}");
    }

    #[test]
    fn test_continuation_without_open_draft_is_malformed() {
        let mut r = ToolCallReassembler::new();
        let err = r.push_fragment(None, None, "{}").unwrap_err();
        assert!(matches!(err, RelayError::MalformedStream(_)));
        assert!(!r.has_drafts());
    }

    #[test]
    fn test_has_drafts_survives_take_batch() {
        let mut r = ToolCallReassembler::new();
        assert!(!r.has_drafts());
        r.push_fragment(Some("a".into()), Some("t".into()), "").unwrap();
        let _ = r.take_batch();
        assert!(r.has_drafts());
        assert!(r.pending().is_empty());
        assert!(r.push_fragment(None, None, "x").is_err());
    }
}
