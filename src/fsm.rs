//! A small table-driven finite state machine.
//!
//! A machine is described by a [`Matrix`]: one cell per (state, event) pair
//! naming the event action to run and the state to move to, plus an optional
//! state action per state. State actions run before the event action each time
//! an event is dispatched in that state, and may veto the event action with
//! [`Flow::Skip`].
//!
//! Actions are plain function pointers taking the machine's context `C` and
//! a [`Scope`] giving access to the pending event queue. The matrix is
//! validated once when built, and shared read-only between instances.
//!
//! ```
//! use emsbus_proto::fsm::{Flow, Matrix, Fsm, Scope};
//!
//! #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
//! enum Light { Off, On }
//! #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
//! enum Press { Button }
//!
//! fn count(presses: &mut u32, _: &mut Scope<'_, Light, Press>) {
//!     *presses += 1;
//! }
//!
//! let matrix = Matrix::builder(&[Light::Off, Light::On], &[Press::Button])
//!     .on(Light::Off, Press::Button, Light::On, count)
//!     .on(Light::On, Press::Button, Light::Off, count)
//!     .build()
//!     .unwrap();
//!
//! let mut fsm = Fsm::new(matrix.into(), Light::Off).unwrap();
//! let mut presses = 0;
//! fsm.report(Press::Button).unwrap();
//! fsm.report(Press::Button).unwrap();
//! fsm.report(Press::Button).unwrap();
//! assert_eq!(fsm.run(&mut presses).unwrap(), 3);
//! assert_eq!(fsm.state(), Light::On);
//! assert_eq!(presses, 3);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use log::{error, trace};
use snafu::{ensure, OptionExt, Snafu};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// There is no event to dispatch. This is the normal idle condition.
    #[snafu(display("Event queue is empty"))]
    EmptyQueue,
    /// The matrix has no cell for the (state, event) pair.
    #[snafu(display("No transition for event {} in state {}", event, state))]
    UndefinedTransition { state: String, event: String },
    /// A declared (state, event) pair has no cell.
    #[snafu(display("Transition matrix has no cell for event {} in state {}", event, state))]
    IncompleteMatrix { state: String, event: String },
    /// A state used by the matrix or an instance isn't declared.
    #[snafu(display("State {} is not declared", state))]
    UnknownState { state: String },
    /// An event reported to an instance isn't declared.
    #[snafu(display("Event {} is not declared", event))]
    UnknownEvent { event: String },
    /// A state action stopped the machine.
    #[snafu(display("Halted by state action in state {} on event {}", state, event))]
    Halted { state: String, event: String },
}

fn name<T: Debug>(t: &T) -> String {
    format!("{:?}", t)
}

/// Verdict of a state action.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Run the event action and make the transition.
    Proceed,
    /// Drop the event for this cycle. No event action, no transition.
    Skip,
    /// Stop the machine. Dispatch fails with [`Error::Halted`].
    Halt,
}

/// Pending events of one machine instance.
///
/// Two FIFO queues: [`augment`](Self::augment)ed events are handled before
/// any [`report`](Self::report)ed one, in the order they were augmented.
#[derive(Debug)]
pub struct EventQueue<E> {
    urgent: VecDeque<E>,
    events: VecDeque<E>,
}

impl<E> EventQueue<E> {
    fn new() -> Self {
        Self {
            urgent: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Queue an event behind all pending ones.
    pub fn report(&mut self, event: E) {
        self.events.push_back(event);
    }

    /// Queue an event ahead of every reported one, behind earlier augmented ones.
    pub fn augment(&mut self, event: E) {
        self.urgent.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.urgent.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.urgent.clear();
        self.events.clear();
    }

    fn pop(&mut self) -> Option<E> {
        self.urgent.pop_front().or_else(|| self.events.pop_front())
    }
}

/// The view of the machine an action gets while an event is handled.
#[derive(Debug)]
pub struct Scope<'a, S, E> {
    /// State the event was dispatched in.
    pub state: S,
    /// Event being handled.
    pub event: E,
    /// State the machine moves to after the event action, if the matrix has a cell.
    pub next: Option<S>,
    /// The machine's pending events.
    pub queue: &'a mut EventQueue<E>,
}

/// An event action.
pub type Action<C, S, E> = fn(&mut C, &mut Scope<'_, S, E>);

/// A state action.
pub type StateAction<C, S, E> = fn(&mut C, &mut Scope<'_, S, E>) -> Flow;

/// One cell of the transition matrix.
pub struct Transition<C, S, E> {
    pub next: S,
    pub action: Action<C, S, E>,
}

// Function pointers with higher-ranked lifetimes don't derive these.
impl<C, S: Copy, E> Clone for Transition<C, S, E> {
    fn clone(&self) -> Self {
        Self {
            next: self.next,
            action: self.action,
        }
    }
}

impl<C, S: Copy, E> Copy for Transition<C, S, E> {}

impl<C, S: Debug, E> Debug for Transition<C, S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition").field("next", &self.next).finish()
    }
}

/// Immutable transition matrix and state action vector.
pub struct Matrix<C, S, E> {
    states: Vec<S>,
    events: Vec<E>,
    cells: HashMap<(S, E), Transition<C, S, E>>,
    state_actions: HashMap<S, StateAction<C, S, E>>,
}

impl<C, S, E> Debug for Matrix<C, S, E>
where
    S: Debug,
    E: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("states", &self.states)
            .field("events", &self.events)
            .field("cells", &self.cells.len())
            .finish()
    }
}

impl<C, S, E> Matrix<C, S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    /// Start building a matrix over the declared states and events.
    pub fn builder(states: &[S], events: &[E]) -> MatrixBuilder<C, S, E> {
        MatrixBuilder {
            states: states.to_vec(),
            events: events.to_vec(),
            cells: HashMap::new(),
            state_actions: HashMap::new(),
            bad_state: None,
        }
    }

    /// Look up the cell for (state, event).
    pub fn transition(&self, state: S, event: E) -> Option<&Transition<C, S, E>> {
        self.cells.get(&(state, event))
    }

    /// The state action registered for `state`.
    pub fn state_action(&self, state: S) -> Option<StateAction<C, S, E>> {
        self.state_actions.get(&state).copied()
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn has_state(&self, state: S) -> bool {
        self.states.contains(&state)
    }

    pub fn has_event(&self, event: E) -> bool {
        self.events.contains(&event)
    }
}

/// Builder for [`Matrix`], see [`Matrix::builder`].
pub struct MatrixBuilder<C, S, E> {
    states: Vec<S>,
    events: Vec<E>,
    cells: HashMap<(S, E), Transition<C, S, E>>,
    state_actions: HashMap<S, StateAction<C, S, E>>,
    bad_state: Option<S>,
}

impl<C, S, E> MatrixBuilder<C, S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    /// Set the cell for (state, event). A later call for the same pair replaces it.
    pub fn on(mut self, state: S, event: E, next: S, action: Action<C, S, E>) -> Self {
        self.cells.insert((state, event), Transition { next, action });
        self
    }

    /// Set the cell for `event` in each of `states`, staying in the same state.
    pub fn stay(mut self, states: &[S], event: E, action: Action<C, S, E>) -> Self {
        for &state in states {
            self.cells.insert(
                (state, event),
                Transition {
                    next: state,
                    action,
                },
            );
        }
        self
    }

    /// Register the state action of `state`.
    pub fn state_action(mut self, state: S, action: StateAction<C, S, E>) -> Self {
        if !self.states.contains(&state) {
            self.bad_state.get_or_insert(state);
        }
        self.state_actions.insert(state, action);
        self
    }

    /// Validate and freeze the matrix.
    /// # Errors
    /// [`Error::UnknownState`] if a cell, key or state action uses an undeclared state,
    /// [`Error::IncompleteMatrix`] if a declared (state, event) pair has no cell.
    pub fn build(self) -> Result<Matrix<C, S, E>, Error> {
        if let Some(state) = self.bad_state {
            return UnknownStateSnafu { state: name(&state) }.fail();
        }
        for (&(state, event), cell) in &self.cells {
            for s in [state, cell.next].iter() {
                ensure!(self.states.contains(s), UnknownStateSnafu { state: name(s) });
            }
            ensure!(
                self.events.contains(&event),
                UnknownEventSnafu { event: name(&event) }
            );
        }
        for &state in &self.states {
            for &event in &self.events {
                ensure!(
                    self.cells.contains_key(&(state, event)),
                    IncompleteMatrixSnafu {
                        state: name(&state),
                        event: name(&event)
                    }
                );
            }
        }
        Ok(Matrix {
            states: self.states,
            events: self.events,
            cells: self.cells,
            state_actions: self.state_actions,
        })
    }
}

/// Result of one successful dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step<S, E> {
    /// The event action ran and the machine moved from `from` to `to`.
    Moved { from: S, event: E, to: S },
    /// A state action vetoed the event.
    Skipped { state: S, event: E },
}

/// A running machine instance: current state plus its own event queue.
pub struct Fsm<C, S, E> {
    matrix: Arc<Matrix<C, S, E>>,
    state: S,
    previous: Option<S>,
    event: Option<E>,
    queue: EventQueue<E>,
}

impl<C, S, E> Debug for Fsm<C, S, E>
where
    S: Debug,
    E: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsm")
            .field("state", &self.state)
            .field("previous", &self.previous)
            .field("event", &self.event)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<C, S, E> Fsm<C, S, E>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    /// Create an instance in state `initial`.
    /// # Errors
    /// [`Error::UnknownState`] if `initial` isn't declared by the matrix.
    pub fn new(matrix: Arc<Matrix<C, S, E>>, initial: S) -> Result<Self, Error> {
        ensure!(
            matrix.has_state(initial),
            UnknownStateSnafu {
                state: name(&initial)
            }
        );
        Ok(Self {
            matrix,
            state: initial,
            previous: None,
            event: None,
            queue: EventQueue::new(),
        })
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn previous_state(&self) -> Option<S> {
        self.previous
    }

    /// The event handled most recently.
    pub fn last_event(&self) -> Option<E> {
        self.event
    }

    pub fn matrix(&self) -> &Arc<Matrix<C, S, E>> {
        &self.matrix
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue an event behind the pending ones.
    /// # Errors
    /// [`Error::UnknownEvent`] if the matrix doesn't declare `event`.
    pub fn report(&mut self, event: E) -> Result<(), Error> {
        self.check_event(event)?;
        self.queue.report(event);
        Ok(())
    }

    /// Queue an event ahead of the reported ones.
    /// # Errors
    /// [`Error::UnknownEvent`] if the matrix doesn't declare `event`.
    pub fn augment(&mut self, event: E) -> Result<(), Error> {
        self.check_event(event)?;
        self.queue.augment(event);
        Ok(())
    }

    fn check_event(&self, event: E) -> Result<(), Error> {
        ensure!(
            self.matrix.has_event(event),
            UnknownEventSnafu { event: name(&event) }
        );
        Ok(())
    }

    /// Handle the next pending event.
    /// # Errors
    /// [`Error::EmptyQueue`] when there is nothing to do. Any other error is a
    /// configuration bug of the matrix or its actions.
    pub fn dispatch(&mut self, context: &mut C) -> Result<Step<S, E>, Error> {
        let event = self.queue.pop().context(EmptyQueueSnafu)?;
        let state = self.state;
        self.event = Some(event);

        let matrix = Arc::clone(&self.matrix);
        let cell = matrix.transition(state, event).copied();
        let mut scope = Scope {
            state,
            event,
            next: cell.map(|c| c.next),
            queue: &mut self.queue,
        };

        if let Some(state_action) = matrix.state_action(state) {
            match state_action(context, &mut scope) {
                Flow::Proceed => {}
                Flow::Skip => {
                    trace!("{:?}: {:?} skipped by state action", state, event);
                    return Ok(Step::Skipped { state, event });
                }
                Flow::Halt => {
                    error!("{:?}: halted on {:?}", state, event);
                    return HaltedSnafu {
                        state: name(&state),
                        event: name(&event),
                    }
                    .fail();
                }
            }
        }

        let cell = match cell {
            Some(cell) => cell,
            None => {
                error!("{:?}: no transition for {:?}", state, event);
                return UndefinedTransitionSnafu {
                    state: name(&state),
                    event: name(&event),
                }
                .fail();
            }
        };

        (cell.action)(context, &mut scope);
        trace!("{:?} --{:?}--> {:?}", state, event, cell.next);
        self.previous = Some(state);
        self.state = cell.next;
        Ok(Step::Moved {
            from: state,
            event,
            to: cell.next,
        })
    }

    /// Dispatch until the queue is empty, returning the number of events handled.
    /// # Errors
    /// Any error of [`dispatch`](Self::dispatch) other than [`Error::EmptyQueue`].
    pub fn run(&mut self, context: &mut C) -> Result<usize, Error> {
        let mut handled = 0;
        loop {
            match self.dispatch(context) {
                Ok(_) => handled += 1,
                Err(Error::EmptyQueue) => return Ok(handled),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop all pending events.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    enum St {
        A,
        B,
        C,
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    enum Ev {
        Go,
        Back,
        Echo,
    }

    #[derive(Default)]
    struct Log {
        actions: Vec<(St, Ev)>,
        veto: bool,
        halt: bool,
    }

    const STATES: [St; 3] = [St::A, St::B, St::C];
    const EVENTS: [Ev; 3] = [Ev::Go, Ev::Back, Ev::Echo];

    fn record(log: &mut Log, scope: &mut Scope<'_, St, Ev>) {
        log.actions.push((scope.state, scope.event));
    }

    fn record_and_echo(log: &mut Log, scope: &mut Scope<'_, St, Ev>) {
        record(log, scope);
        scope.queue.augment(Ev::Echo);
    }

    fn guard(log: &mut Log, scope: &mut Scope<'_, St, Ev>) -> Flow {
        if log.halt {
            Flow::Halt
        } else if log.veto && scope.event == Ev::Go {
            Flow::Skip
        } else {
            Flow::Proceed
        }
    }

    fn matrix() -> Arc<Matrix<Log, St, Ev>> {
        Matrix::builder(&STATES, &EVENTS)
            .on(St::A, Ev::Go, St::B, record_and_echo)
            .on(St::B, Ev::Go, St::C, record)
            .on(St::C, Ev::Go, St::A, record)
            .stay(&STATES, Ev::Echo, record)
            .on(St::A, Ev::Back, St::A, record)
            .on(St::B, Ev::Back, St::A, record)
            .on(St::C, Ev::Back, St::B, record)
            .state_action(St::A, guard)
            .build()
            .unwrap()
            .into()
    }

    #[test]
    fn test_dispatch_order() {
        let mut fsm = Fsm::new(matrix(), St::A).unwrap();
        let mut log = Log::default();

        fsm.report(Ev::Go).unwrap();
        fsm.report(Ev::Back).unwrap();
        assert_eq!(
            fsm.dispatch(&mut log),
            Ok(Step::Moved {
                from: St::A,
                event: Ev::Go,
                to: St::B
            })
        );
        // The augmented echo goes ahead of the queued Back
        assert_eq!(fsm.run(&mut log), Ok(2));
        assert_eq!(
            log.actions,
            vec![(St::A, Ev::Go), (St::B, Ev::Echo), (St::B, Ev::Back)]
        );
        assert_eq!(fsm.state(), St::A);
        assert_eq!(fsm.previous_state(), Some(St::B));
        assert_eq!(fsm.last_event(), Some(Ev::Back));
        assert_eq!(fsm.dispatch(&mut log), Err(Error::EmptyQueue));
    }

    #[test]
    fn test_augmented_events_keep_their_order() {
        let mut fsm = Fsm::new(matrix(), St::B).unwrap();
        let mut log = Log::default();

        fsm.report(Ev::Echo).unwrap();
        fsm.augment(Ev::Go).unwrap();
        fsm.augment(Ev::Back).unwrap();
        assert_eq!(fsm.run(&mut log), Ok(3));
        assert_eq!(
            log.actions,
            vec![(St::B, Ev::Go), (St::C, Ev::Back), (St::B, Ev::Echo)]
        );
    }

    #[test]
    fn test_skip_and_halt() {
        let mut fsm = Fsm::new(matrix(), St::A).unwrap();
        let mut log = Log {
            veto: true,
            ..Log::default()
        };
        fsm.report(Ev::Go).unwrap();
        assert_eq!(
            fsm.dispatch(&mut log),
            Ok(Step::Skipped {
                state: St::A,
                event: Ev::Go
            })
        );
        assert_eq!(fsm.state(), St::A);
        assert!(log.actions.is_empty());

        log.halt = true;
        fsm.report(Ev::Back).unwrap();
        assert!(matches!(fsm.dispatch(&mut log), Err(Error::Halted { .. })));
        assert_eq!(fsm.state(), St::A);
    }

    #[test]
    fn test_incomplete_matrix() {
        let result = Matrix::<Log, St, Ev>::builder(&STATES, &EVENTS)
            .stay(&STATES, Ev::Go, record)
            .stay(&STATES, Ev::Back, record)
            .stay(&[St::A, St::B], Ev::Echo, record)
            .build();
        assert_eq!(
            result.unwrap_err(),
            Error::IncompleteMatrix {
                state: "C".into(),
                event: "Echo".into()
            }
        );
    }

    #[test]
    fn test_undeclared_states_and_events() {
        let result = Matrix::<Log, St, Ev>::builder(&[St::A, St::B], &EVENTS)
            .stay(&[St::A, St::B], Ev::Go, record)
            .stay(&[St::A, St::B], Ev::Back, record)
            .stay(&[St::A, St::B], Ev::Echo, record)
            .on(St::A, Ev::Go, St::C, record)
            .build();
        assert_eq!(result.unwrap_err(), Error::UnknownState { state: "C".into() });

        let partial: Arc<Matrix<Log, St, Ev>> = Matrix::builder(&[St::A], &[Ev::Go])
            .stay(&[St::A], Ev::Go, record)
            .build()
            .unwrap()
            .into();
        assert!(Fsm::new(Arc::clone(&partial), St::B).is_err());
        let mut fsm = Fsm::new(partial, St::A).unwrap();
        assert_eq!(
            fsm.report(Ev::Back),
            Err(Error::UnknownEvent {
                event: "Back".into()
            })
        );
    }

    #[test]
    fn test_never_leaves_declared_states() {
        let matrix = matrix();
        let mut fsm = Fsm::new(Arc::clone(&matrix), St::A).unwrap();
        let mut log = Log::default();
        // A fixed pseudo-random walk over all events
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let event = EVENTS[(seed >> 16) as usize % EVENTS.len()];
            fsm.report(event).unwrap();
            fsm.run(&mut log).unwrap();
            assert!(matrix.has_state(fsm.state()));
        }
    }
}
