//! Stage thread scheduling priority
//!
//! The pipeline asks the host for a priority ladder: Capture runs
//! time-critical (a driver callback missed is samples lost), the Writer
//! high (a stalled sink backs the whole graph up), the processing stages
//! above normal. A host that refuses is logged and ignored - priority is
//! an optimization, not a correctness requirement.

/// Requested scheduling class for a stage thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePriority {
    TimeCritical,
    High,
    AboveNormal,
}

/// Ask the host to elevate the current thread. Best-effort.
pub fn set_current_thread_priority(priority: StagePriority, stage: &str) {
    match platform_set_priority(priority) {
        Ok(()) => log::debug!("{stage}: thread priority set to {priority:?}"),
        Err(reason) => log::debug!("{stage}: priority request {priority:?} refused: {reason}"),
    }
}

#[cfg(target_os = "linux")]
fn platform_set_priority(priority: StagePriority) -> Result<(), String> {
    // SCHED_FIFO for the time-critical tier (needs CAP_SYS_NICE), niceness
    // for the rest.
    match priority {
        StagePriority::TimeCritical => {
            let param = libc::sched_param { sched_priority: 50 };
            let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
            if rc == 0 {
                return Ok(());
            }
            // Fall back to the strongest niceness we can get.
            renice(-15)
        }
        StagePriority::High => renice(-10),
        StagePriority::AboveNormal => renice(-5),
    }
}

#[cfg(target_os = "linux")]
fn renice(value: i32) -> Result<(), String> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, value) };
    if rc == 0 {
        Ok(())
    } else {
        Err(format!("setpriority({value}) errno {}", unsafe {
            *libc::__errno_location()
        }))
    }
}

#[cfg(not(target_os = "linux"))]
fn platform_set_priority(_priority: StagePriority) -> Result<(), String> {
    Err("not supported on this platform".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_request_never_panics() {
        // Typically refused without privileges; must stay non-fatal.
        set_current_thread_priority(StagePriority::TimeCritical, "test");
        set_current_thread_priority(StagePriority::High, "test");
        set_current_thread_priority(StagePriority::AboveNormal, "test");
    }
}
