use crate::error::{GraphError, Result};
use crate::types::{Node, ParamValue, Parameters};

#[derive(Debug, Clone, PartialEq)]
struct EditBuffer {
    node_id: String,
    name: String,
    parameters: Parameters,
    dirty: bool,
}

/// Edits staged by the editor, ready to be written back as one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedEdit {
    pub node_id: String,
    pub name: String,
    pub parameters: Parameters,
}

/// Staging buffer for the name and parameters of one unit.
///
/// Edits never touch the graph until [`ParameterEditor::save`] hands them back
/// to the caller.
#[derive(Debug, Clone, Default)]
pub struct ParameterEditor {
    buffer: Option<EditBuffer>,
}

impl ParameterEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the committed state of `node` into the buffer.
    pub fn open(&mut self, node: &Node) {
        self.buffer = Some(EditBuffer {
            node_id: node.id.clone(),
            name: node.name.clone(),
            parameters: node.parameters.clone(),
            dirty: false,
        });
    }

    /// Drop the buffer, returning whether unsaved edits were discarded.
    pub fn close(&mut self) -> bool {
        self.buffer.take().map(|b| b.dirty).unwrap_or(false)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.buffer.as_ref().map(|b| b.node_id.as_str())
    }

    pub fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.as_ref().map(|b| b.dirty).unwrap_or(false)
    }

    pub fn name(&self) -> Option<&str> {
        self.buffer.as_ref().map(|b| b.name.as_str())
    }

    pub fn parameters(&self) -> Option<&Parameters> {
        self.buffer.as_ref().map(|b| &b.parameters)
    }

    fn buffer_mut(&mut self) -> Result<&mut EditBuffer> {
        self.buffer.as_mut().ok_or(GraphError::NothingSelected)
    }

    pub fn edit(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let buffer = self.buffer_mut()?;
        buffer.parameters.insert(key.to_owned(), value.into());
        buffer.dirty = true;
        Ok(())
    }

    pub fn remove_parameter(&mut self, key: &str) -> Result<Option<ParamValue>> {
        let buffer = self.buffer_mut()?;
        let removed = buffer.parameters.remove(key);
        if removed.is_some() {
            buffer.dirty = true;
        }
        Ok(removed)
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let buffer = self.buffer_mut()?;
        buffer.name = name.to_owned();
        buffer.dirty = true;
        Ok(())
    }

    /// Hand back the staged edits and mark the buffer clean. `None` when
    /// nothing changed since the last open, save or reset.
    pub fn save(&mut self) -> Option<StagedEdit> {
        let buffer = self.buffer.as_mut()?;
        if !buffer.dirty {
            return None;
        }
        buffer.dirty = false;
        Some(StagedEdit {
            node_id: buffer.node_id.clone(),
            name: buffer.name.clone(),
            parameters: buffer.parameters.clone(),
        })
    }

    /// Re-copy the committed state, discarding staged edits.
    pub fn reset(&mut self, node: &Node) {
        self.open(node);
    }

    /// Refresh a clean buffer from the committed node. Dirty buffers are left
    /// alone so staged edits survive unrelated commits.
    pub fn sync_from(&mut self, node: &Node) {
        if let Some(buffer) = &self.buffer {
            if buffer.node_id == node.id && !buffer.dirty {
                self.open(node);
            }
        }
    }
}
