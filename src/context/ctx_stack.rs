use std::path::PathBuf;

use crate::database::DbHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

/// One pushed context: the namespace it binds and what it resolved to.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub ns: String,
    pub path: PathBuf,
    pub db: Option<DbHandle>,
    pub just_created: bool,
    pub suspended: bool,
}

impl Frame {
    /// Bound to a database and not suspended.
    pub fn is_live(&self) -> bool {
        self.db.is_some() && !self.suspended
    }
}

#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Frame>,
    next_id: u64,
}

impl ContextStack {
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, ns: String, path: PathBuf) -> FrameId {
        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.frames.push(Frame {
            id,
            ns,
            path,
            db: None,
            just_created: false,
            suspended: false,
        });
        id
    }

    /// Remove `id` and everything pushed after it.
    ///
    /// Returns the frame and how many frames above it were discarded, or
    /// `None` if the frame is no longer on the stack.
    pub fn pop(&mut self, id: FrameId) -> Option<(Frame, usize)> {
        let pos = self.frames.iter().rposition(|f| f.id == id)?;
        let discarded = self.frames.len() - pos - 1;
        self.frames.truncate(pos + 1);
        self.frames.pop().map(|frame| (frame, discarded))
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.id == id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| f.id == id)
    }

    /// Innermost frame still holding a database across an unlock.
    pub fn unvalidated(&self) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.is_live())
    }
}
