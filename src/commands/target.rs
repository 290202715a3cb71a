//! Target lifecycle commands

use super::{BdmSession, CmdResult};
use bdmflash_core::bdm::Command;
use bdmflash_core::TargetStatus;

/// Lifecycle operations reachable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Enter background mode
    Stop,
    /// Execute one instruction
    Step,
    /// Reset into background mode
    Reset,
    /// Reset and run
    Restart,
    /// Release every line
    Release,
}

impl Lifecycle {
    fn command(self) -> Command {
        match self {
            Self::Stop => Command::StopChip,
            Self::Step => Command::StepChip,
            Self::Reset => Command::ResetChip,
            Self::Restart => Command::RestartChip,
            Self::Release => Command::ReleaseChip,
        }
    }

    /// Whether the target is left in background mode
    fn leaves_stopped(self) -> bool {
        matches!(self, Self::Stop | Self::Step | Self::Reset)
    }

    fn done(self) -> &'static str {
        match self {
            Self::Stop => "Target stopped",
            Self::Step => "Stepped one instruction",
            Self::Reset => "Target reset into background mode",
            Self::Restart => "Target restarted",
            Self::Release => "Target released",
        }
    }
}

/// Text form of a status value
pub fn describe(status: TargetStatus) -> String {
    if status.is_empty() {
        return "running".to_string();
    }
    status
        .iter_names()
        .map(|(name, _)| name.to_lowercase().replace('_', " "))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Show the decoded status lines
pub fn run_status(session: &mut BdmSession) -> CmdResult {
    let status = session.get_status()?;
    println!("Interface:  {}", session.kind());
    println!("Status:     {}", describe(status));
    match status.unavailable() {
        Some(fault) => println!("Reachable:  no ({})", fault),
        None => println!("Reachable:  yes"),
    }
    Ok(())
}

/// Run one lifecycle operation; a stopped target gets its registers shown
pub fn run_lifecycle(session: &mut BdmSession, op: Lifecycle) -> CmdResult {
    session.command(op.command())?;
    println!("{}", op.done());
    if op.leaves_stopped() {
        print_registers(session)?;
    }
    Ok(())
}

fn print_registers(session: &mut BdmSession) -> CmdResult {
    let mut values = [0u32; 16];
    for (reg, value) in values.iter_mut().enumerate() {
        *value = session.read_register(reg as u8)?;
    }
    println!();
    for (bank, prefix) in ["D", "A"].iter().enumerate() {
        let row: Vec<String> = (0..8)
            .map(|i| format!("{}{}={:08X}", prefix, i, values[bank * 8 + i]))
            .collect();
        println!("  {}", row.join(" "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe(TargetStatus::empty()), "running");
        assert_eq!(describe(TargetStatus::STOPPED), "stopped");
        assert_eq!(
            describe(TargetStatus::RESET | TargetStatus::POWER_FAIL),
            "reset, power fail"
        );
    }

    #[test]
    fn test_stopping_ops() {
        assert!(Lifecycle::Reset.leaves_stopped());
        assert!(!Lifecycle::Release.leaves_stopped());
        assert_eq!(Lifecycle::Step.command(), Command::StepChip);
    }
}
