//! # Batch Execution
//!
//! Runs a `call_batch` and produces one response per element, in order.
//! Independent batches run every element regardless of failures. Atomic
//! batches stop at the first failure: the failing element reports its real
//! error and every sibling reports `ATOMIC_ABORT`. Elements that already
//! ran are not rolled back; atomicity here means "no further effects", not
//! transactional undo.

use tickwire::CallRequest;
use tickwire::Message;

use crate::dispatch::error_response;
use crate::dispatch::Dispatcher;
use crate::error::CallError;

pub fn run_batch(dispatcher: &Dispatcher, atomic: bool, calls: &[CallRequest]) -> Vec<Message> {
    if atomic {
        run_atomic(dispatcher, calls)
    } else {
        run_independent(dispatcher, calls)
    }
}

fn run_independent(dispatcher: &Dispatcher, calls: &[CallRequest]) -> Vec<Message> {
    calls.iter().map(|call| dispatcher.dispatch(call)).collect()
}

fn run_atomic(dispatcher: &Dispatcher, calls: &[CallRequest]) -> Vec<Message> {
    let mut responses = Vec::with_capacity(calls.len());
    let mut failed_at = None;

    for (index, call) in calls.iter().enumerate() {
        let response = dispatcher.dispatch(call);
        let failed = matches!(response, Message::Error { .. });
        responses.push(response);
        if failed {
            failed_at = Some(index);
            break;
        }
    }

    let Some(failed_at) = failed_at else {
        return responses;
    };

    // Rewrite every sibling of the failing element, both the ones that ran
    // before it and the ones that never ran.
    let mut out = Vec::with_capacity(calls.len());
    for (index, call) in calls.iter().enumerate() {
        if index == failed_at {
            out.push(responses[index].clone());
        } else {
            out.push(error_response(call.id, &CallError::AtomicAbort));
        }
    }
    out
}
