use tracing::trace;

use super::{ExecutionContext, ScriptError};
use crate::ast::Command;

/// Runs `commands` in order against `context`, stopping at the first error.
///
/// Writes made before the failing command stay in the context's output;
/// callers must not trust that output when an error is returned.
pub fn execute(commands: &[Command], context: &mut ExecutionContext<'_>) -> Result<(), ScriptError> {
    for (index, command) in commands.iter().enumerate() {
        trace!(job = context.job(), index, position = %command.position(), "executing command");
        command.execute(context)?;
    }
    Ok(())
}
