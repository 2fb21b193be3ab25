use std::path::Path;

use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::invoker::{CommandLine, Invocation, InvokeError, Invoker, SystemRunner};
use crate::normalize::TextLayout;
use crate::settings::{CommandSettings, TransferSettings};

/// Tallies for one run. Recoverable failures land here instead of aborting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunCounters {
    pub invocations: usize,
    pub detail_failures: usize,
    pub skipped_entities: usize,
    pub failed_actions: usize,
}

/// Everything a component needs for one run, passed explicitly.
pub struct RunContext {
    pub run_id: Uuid,
    pub commands: CommandSettings,
    pub layout: TextLayout,
    pub cancel: CancelFlag,
    pub counters: RunCounters,
    pub show_progress: bool,
    invoker: Invoker,
}

impl RunContext {
    pub fn new(invoker: Invoker, commands: CommandSettings, layout: TextLayout) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            commands,
            layout,
            cancel: CancelFlag::new(),
            counters: RunCounters::default(),
            show_progress: false,
            invoker,
        }
    }

    /// Wires a [`SystemRunner`] for `program` from the tool settings.
    pub fn from_settings(settings: &TransferSettings, program: &Path, cancel: CancelFlag) -> Self {
        let runner = SystemRunner::new(program)
            .with_base_args(settings.tool.base_args.clone())
            .with_timeout(settings.tool.timeout())
            .with_cancel(cancel.clone());
        let invoker = Invoker::new(Box::new(runner)).with_flag(settings.tool.structured_flag());
        let mut ctx = Self::new(
            invoker,
            settings.commands.clone(),
            settings.tool.text_layout(),
        );
        ctx.cancel = cancel;
        ctx
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn invoke(
        &mut self,
        command: &CommandLine,
        want_structured: bool,
    ) -> Result<Invocation, InvokeError> {
        self.counters.invocations += 1;
        self.invoker.invoke(command, want_structured)
    }
}
