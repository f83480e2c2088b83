//! Table-driven finite state machines.
//!
//! A machine is described by [`StateMachine::transition`], an explicit mapping
//! from `(state, event)` to the actions to run and the optional next state.
//! A pair without an entry is a no-op. [`Fsm`] owns the current state and the
//! event queue, and keeps two bounded histories of processed events: a verbose
//! one with everything and a summary one without routine events that did not
//! change state.
//!
//! The owner drives the machine:
//!
//! ```text
//! fsm.push_event(event);
//! while let Some(step) = fsm.next_step() {
//!     for action in step.actions { owner.run(action, &step.event) }
//! }
//! ```

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Debug;
use tracing::debug;

/// Number of records kept in the verbose history
pub const VERBOSE_HISTORY_LEN: usize = 50;
/// Number of records kept in the summary history
pub const SUMMARY_HISTORY_LEN: usize = 25;

/// One entry of a transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S: 'static, A: 'static> {
    /// Actions run in order before the state changes
    pub actions: &'static [A],
    /// New state, `None` to stay
    pub next: Option<S>,
}

impl<S: 'static, A: 'static> Transition<S, A> {
    /// Run actions and move to `next`
    pub const fn to(next: S, actions: &'static [A]) -> Self {
        Self {
            actions,
            next: Some(next),
        }
    }

    /// Run actions and stay in the current state
    pub const fn stay(actions: &'static [A]) -> Self {
        Self {
            actions,
            next: None,
        }
    }
}

/// Description of a state machine
pub trait StateMachine {
    /// State type
    type State: Copy + Eq + Debug + 'static;
    /// Event type
    type Event: Clone + Debug;
    /// Action type
    type Action: Copy + Debug + 'static;

    /// Name used in logs
    const NAME: &'static str;

    /// Transition for `(state, event)`, `None` when the pair is not handled
    fn transition(
        state: Self::State,
        event: &Self::Event,
    ) -> Option<Transition<Self::State, Self::Action>>;

    /// Actions run when entering `state`
    fn entry_actions(_state: Self::State) -> &'static [Self::Action] {
        &[]
    }

    /// Actions run when leaving `state`
    fn exit_actions(_state: Self::State) -> &'static [Self::Action] {
        &[]
    }

    /// Routine events are left out of the summary history unless they change
    /// state
    fn is_routine(_event: &Self::Event) -> bool {
        false
    }
}

/// One processed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    /// Per-machine sequence number, strictly increasing
    pub seq: u64,
    /// State before the event
    pub from_state: String,
    /// Event name
    pub event: String,
    /// Actions run, in order
    pub actions: Vec<String>,
    /// Events pushed while running the actions
    pub pushed: Vec<String>,
    /// State after the event when it changed
    pub to_state: Option<String>,
    /// The pair had no table entry
    pub implicit: bool,
}

/// Result of processing one event
#[derive(Debug, Clone)]
pub struct Step<M: StateMachine> {
    /// The processed event
    pub event: M::Event,
    /// State before the event
    pub from: M::State,
    /// State after the event
    pub to: M::State,
    /// Actions to run, in order: transition, exit, entry
    pub actions: Vec<M::Action>,
}

/// A running state machine
#[derive(Debug)]
pub struct Fsm<M: StateMachine> {
    state: M::State,
    queue: VecDeque<M::Event>,
    verbose: VecDeque<HistoryRecord>,
    summary: VecDeque<HistoryRecord>,
    next_seq: u64,
    in_step: bool,
}

impl<M: StateMachine> Fsm<M> {
    /// Create a machine in its initial state, running the initial entry
    /// actions is left to the owner
    pub fn new(initial: M::State) -> Self {
        Self {
            state: initial,
            queue: VecDeque::new(),
            verbose: VecDeque::new(),
            summary: VecDeque::new(),
            next_seq: 1,
            in_step: false,
        }
    }

    /// Current state
    pub fn state(&self) -> M::State {
        self.state
    }

    /// Queue an event. Events pushed while the previous step's actions run
    /// are attributed to that step in the history.
    pub fn push_event(&mut self, event: M::Event) {
        if self.in_step {
            let name = event_name(&event);
            if let Some(record) = self.verbose.back_mut() {
                record.pushed.push(name.clone());
            }
            if let Some(record) = self.summary.back_mut() {
                if record.seq + 1 == self.next_seq {
                    record.pushed.push(name);
                }
            }
        }
        self.queue.push_back(event);
    }

    /// Process the next queued event
    pub fn next_step(&mut self) -> Option<Step<M>> {
        let event = match self.queue.pop_front() {
            Some(event) => event,
            None => {
                self.in_step = false;
                return None;
            }
        };
        let from = self.state;
        let mut actions = Vec::new();
        let mut to = from;
        let implicit;

        match M::transition(from, &event) {
            Some(transition) => {
                implicit = false;
                actions.extend_from_slice(transition.actions);
                if let Some(next) = transition.next {
                    to = next;
                }
            }
            None => implicit = true,
        }

        if to != from {
            actions.extend_from_slice(M::exit_actions(from));
            actions.extend_from_slice(M::entry_actions(to));
            debug!("{} {:?} --{}--> {:?}", M::NAME, from, event_name(&event), to);
        }
        self.state = to;

        let record = HistoryRecord {
            seq: self.next_seq,
            from_state: format!("{:?}", from),
            event: event_name(&event),
            actions: actions.iter().map(|a| format!("{:?}", a)).collect(),
            pushed: Vec::new(),
            to_state: (to != from).then(|| format!("{:?}", to)),
            implicit,
        };
        self.next_seq += 1;
        if to != from || !M::is_routine(&event) {
            push_bounded(&mut self.summary, record.clone(), SUMMARY_HISTORY_LEN);
        }
        push_bounded(&mut self.verbose, record, VERBOSE_HISTORY_LEN);
        self.in_step = true;

        Some(Step {
            event,
            from,
            to,
            actions,
        })
    }

    /// Verbose history, oldest first
    pub fn verbose_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.verbose.iter()
    }

    /// Summary history, oldest first
    pub fn summary_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.summary.iter()
    }

    /// Sequence number the next processed event will get
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

fn event_name<E: Debug>(event: &E) -> String {
    // Only the variant name; payloads are too large for history records.
    let text = format!("{:?}", event);
    match text.find(|c: char| c == '(' || c == ' ' || c == '{') {
        Some(end) => text[..end].to_string(),
        None => text,
    }
}

fn push_bounded(history: &mut VecDeque<HistoryRecord>, record: HistoryRecord, limit: usize) {
    if history.len() == limit {
        history.pop_front();
    }
    history.push_back(record);
}
