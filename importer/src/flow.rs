//! The import flow as an explicit state machine.
//!
//! Steps only move forward one at a time, except that any failure sends the
//! flow back to [`Step::HandleEntry`]. The `can_back` / `can_continue` flags
//! are what a front end reads to enable its back and next controls.

use color_eyre::eyre::eyre;
use tracing::{debug, warn};

use crate::auth::Credentials;
use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    HandleEntry,
    Resolving,
    Authenticated,
    FileSelected,
    Importing,
    Done,
    Failed,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Done)
    }
}

#[derive(Debug)]
pub struct Flow {
    step: Step,
    can_back: bool,
    can_continue: bool,
    last_error: Option<String>,
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl Flow {
    pub fn new() -> Self {
        Self {
            step: Step::HandleEntry,
            can_back: false,
            can_continue: false,
            last_error: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Whether an unforced "back" would be accepted right now
    pub fn allow_back(&self) -> bool {
        self.can_back && self.step > Step::HandleEntry && self.step != Step::Done
    }

    /// Whether an unforced "next" would be accepted right now
    pub fn allow_next(&self) -> bool {
        self.can_continue && !matches!(self.step, Step::Done | Step::Failed)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Credentials typed on the first step; they decide whether "next" is allowed
    pub fn enter_credentials(&mut self, credentials: &Credentials) {
        if self.step != Step::HandleEntry {
            warn!("Ignoring credentials entered during {:?}", self.step);
            return;
        }
        self.can_continue = credentials.is_complete();
    }

    /// HandleEntry -> Resolving
    pub fn start_resolving(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::HandleEntry)?;
        if !self.allow_next() {
            return Err(eyre!("Handle and password are required before continuing"));
        }

        self.move_to(Step::Resolving);
        self.can_back = false;
        self.can_continue = false;
        Ok(())
    }

    /// Resolving -> Authenticated. The file picker drives what happens next.
    pub fn authenticated(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::Resolving)?;

        self.move_to(Step::Authenticated);
        self.can_back = false;
        self.can_continue = false;
        Ok(())
    }

    /// Authenticated -> FileSelected, once a backup parsed into a batch
    pub fn file_selected(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::Authenticated)?;

        self.move_to(Step::FileSelected);
        self.can_continue = true;
        Ok(())
    }

    /// A backup was rejected; the flow stays on the file picker
    pub fn file_rejected(&mut self, err: &FlowError) {
        debug!("Backup rejected during {:?}: {}", self.step, err.kind());
        self.last_error = Some(err.user_message().to_string());
    }

    /// FileSelected -> Importing
    pub fn start_import(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::FileSelected)?;
        if !self.allow_next() {
            return Err(eyre!("No backup selected"));
        }

        self.move_to(Step::Importing);
        self.can_back = false;
        self.can_continue = false;
        Ok(())
    }

    /// Importing -> Done
    pub fn finish(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::Importing)?;

        self.move_to(Step::Done);
        self.can_back = false;
        self.can_continue = false;
        Ok(())
    }

    /// Any step but Done -> Failed
    pub fn fail(&mut self, err: &FlowError) {
        if self.step.is_terminal() {
            warn!("Ignoring failure after the flow finished: {}", err.kind());
            return;
        }

        warn!("Flow failed during {:?}: {}", self.step, err.kind());
        self.move_to(Step::Failed);
        self.last_error = Some(err.user_message().to_string());
        self.can_continue = false;
        self.can_back = true;
    }

    /// Failed -> HandleEntry, the only way out of a failure
    pub fn recover(&mut self) -> color_eyre::Result<()> {
        self.expect(Step::Failed)?;

        self.move_to(Step::HandleEntry);
        self.can_back = false;
        self.can_continue = false;
        Ok(())
    }

    /// Unforced backward navigation, gated by `allow_back`
    pub fn back(&mut self) -> color_eyre::Result<()> {
        if !self.allow_back() {
            return Err(eyre!("Cannot go back from {:?}", self.step));
        }

        // Every later step clears `can_back`, so only a failure gets here
        match self.step {
            Step::Failed => self.recover(),
            step => Err(eyre!("Cannot go back from {:?}", step)),
        }
    }

    fn expect(&self, step: Step) -> color_eyre::Result<()> {
        if self.step != step {
            return Err(eyre!("Expected flow to be at {:?}, it is at {:?}", step, self.step));
        }
        Ok(())
    }

    fn move_to(&mut self, step: Step) {
        debug!("Flow {:?} -> {:?}", self.step, step);
        self.step = step;
    }
}
