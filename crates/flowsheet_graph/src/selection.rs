/// Tracks the single selected unit, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionController {
    selected: Option<String>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `node_id`, returning the previously selected id when it changed.
    pub fn select(&mut self, node_id: &str) -> Option<String> {
        if self.selected.as_deref() == Some(node_id) {
            return None;
        }
        self.selected.replace(node_id.to_owned())
    }

    pub fn clear(&mut self) -> Option<String> {
        self.selected.take()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_selected(&self, node_id: &str) -> bool {
        self.selected.as_deref() == Some(node_id)
    }
}
