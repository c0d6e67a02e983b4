//! Headless, line-oriented output of reassembled records

use std::fmt::Write;

use super::assembler::AssemblerStats;
use super::records::{LocalSnapshot, QueuedTask, Record};

fn task_list(tasks: &[QueuedTask]) -> String {
    let ids: Vec<String> = tasks.iter().map(|t| t.task.to_string()).collect();
    format!("[{}]", ids.join(" "))
}

fn runq_summary(snap: &LocalSnapshot) -> String {
    let mut s = format!("{} {} runq={}", snap.ctx, snap.thread, task_list(&snap.queue));
    if let Some(next) = snap.run_next {
        let _ = write!(s, " next={}", next.task);
    }
    if !snap.consistent {
        s.push_str(" (torn)");
    }
    s
}

/// One line per record (several for grouped records)
#[must_use]
pub fn format_record(record: &Record) -> String {
    match record {
        Record::TaskCreated { thread, creator, pc } => {
            format!("[CREATE] {thread} {creator} → pc={pc}")
        }
        Record::Delay { thread, task, pc } => format!("[DELAY] {thread} {task} pc={pc}"),
        Record::RunqSteal { thread, stealing, stolen } => {
            format!("[STEAL] {thread} {stealing} ← {stolen}")
        }
        Record::Dispatched { thread, ctx, callstack, unwind_failed } => {
            let frames: Vec<String> = callstack.iter().map(ToString::to_string).collect();
            let mut line = format!("[SCHEDULE] {thread} {ctx} stack={}", frames.join(" ← "));
            if *unwind_failed {
                line.push_str(" (unwind failed)");
            }
            line
        }
        Record::Parked { thread, task, pc, wait_reason } => {
            let reason = if wait_reason.is_empty() { "?" } else { wait_reason.as_str() };
            format!("[PARK] {thread} {task} pc={pc} reason=\"{reason}\"")
        }
        Record::LocalRunq(snap) => format!("[RUNQ] {}", runq_summary(snap)),
        Record::GlobalRunq(snap) => {
            let mut line =
                format!("[GLOBAL] size={} runq={}", snap.size, task_list(&snap.entries));
            if snap.truncated {
                line.push_str(" (truncated)");
            }
            line
        }
        Record::SemaTable(snap) => {
            let mut line = format!("[SEMA] v{} waiters={}", snap.version, snap.waiters.len());
            for w in &snap.waiters {
                let _ = write!(line, "\n  {} on {:#x}", w.task, w.addr);
            }
            line
        }
        Record::FoundRunnable(found) => {
            let task = found.found.map_or_else(|| "-".to_string(), |t| t.task.to_string());
            let mut line = format!(
                "[EXECUTE] {} {} {task} caller={} contexts={}/{}",
                found.thread,
                found.ctx,
                found.caller_pc,
                found.contexts.len(),
                found.ctx_count
            );
            for snap in &found.contexts {
                let _ = write!(line, "\n  {}", runq_summary(snap));
            }
            line
        }
        Record::Woken(woken) => {
            let mut line = format!("[WAKE] {} {}", woken.thread, woken.task);
            if let Some(snap) = &woken.runq {
                let _ = write!(line, " then {}", runq_summary(snap));
            }
            line
        }
    }
}

pub fn display_record(record: &Record) {
    println!("{}", format_record(record));
}

pub fn display_statistics(stats: &AssemblerStats) {
    eprintln!(
        "stats: events={} records={} torn_local={} abandoned_local={} truncated_global={} \
         superseded_sema={} stale_sema={} incomplete_found={} orphaned={}",
        stats.events,
        stats.records,
        stats.inconsistent_local,
        stats.abandoned_local,
        stats.truncated_global,
        stats.superseded_sema,
        stats.stale_sema,
        stats.incomplete_found,
        stats.orphaned
    );
}

/// Display progress for a timed run
pub fn display_progress(elapsed_secs: u64, duration: u64) {
    use std::io::Write as _;
    eprint!("\r   Progress: {elapsed_secs}s / {duration}s   ");
    std::io::stderr().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContextId, Pc, TaskId, ThreadId};
    use crate::reader::records::SemaSnapshot;
    use crate::reader::records::SemaWaiter;

    #[test]
    fn test_format_parked_unknown_reason() {
        let line = format_record(&Record::Parked {
            thread: ThreadId(2),
            task: TaskId(17),
            pc: Pc(0x4a_0000),
            wait_reason: String::new(),
        });
        assert_eq!(line, "[PARK] M2 G17 pc=0x4a0000 reason=\"?\"");
    }

    #[test]
    fn test_format_runq_marks_torn() {
        let snap = LocalSnapshot {
            ctx: ContextId(1),
            thread: ThreadId::NONE,
            head: 0,
            tail: 1,
            queue: vec![QueuedTask { task: TaskId(5), pc: Pc(0x10) }],
            run_next: None,
            consistent: false,
        };
        assert_eq!(format_record(&Record::LocalRunq(snap)), "[RUNQ] P1 M- runq=[G5] (torn)");
    }

    #[test]
    fn test_format_sema_lists_waiters() {
        let line = format_record(&Record::SemaTable(SemaSnapshot {
            version: 3,
            waiters: vec![SemaWaiter { task: TaskId(9), addr: 0xc000 }],
        }));
        assert_eq!(line, "[SEMA] v3 waiters=1\n  G9 on 0xc000");
    }
}
