//! Single-flight slot for a flyweight under construction.
//!
//! The first caller to miss on a key installs a `Flight` in the shard and
//! becomes its leader. Other callers for the same key block in [`Flight::wait`]
//! until the leader publishes a value or abandons the attempt (constructor
//! error or panic). Waiters that observe an abandoned flight retry the lookup,
//! so exactly one of them leads the next attempt.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

enum State<V> {
	Running,
	Done(Arc<V>),
	Abandoned,
}

pub(crate) struct Flight<V> {
	state: Mutex<State<V>>,
	settled: Condvar,
	leader: ThreadId,
}

impl<V> Flight<V> {
	/// Create a flight led by the current thread.
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(State::Running),
			settled: Condvar::new(),
			leader: thread::current().id(),
		})
	}

	/// Whether the current thread is the one constructing this flight's value.
	pub fn is_led_by_current_thread(&self) -> bool {
		self.leader == thread::current().id()
	}

	/// Block until the flight settles.
	///
	/// Returns `None` if the leader abandoned construction.
	pub fn wait(&self) -> Option<Arc<V>> {
		let mut state = self.state.lock();
		loop {
			match &*state {
				State::Done(value) => return Some(Arc::clone(value)),
				State::Abandoned => return None,
				State::Running => {}
			}
			self.settled.wait(&mut state);
		}
	}

	pub fn complete(&self, value: Arc<V>) {
		self.settle(State::Done(value));
	}

	pub fn abandon(&self) {
		self.settle(State::Abandoned);
	}

	fn settle(&self, outcome: State<V>) {
		*self.state.lock() = outcome;
		self.settled.notify_all();
	}
}
