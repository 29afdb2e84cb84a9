//! Native behavior-tree core (`§3`, `§4.5`).
//!
//! Composites are always host-native: a [`Node`] is ticked by calling its
//! [`Tick`] with its own children, and a `Tick` decides for itself whether
//! it can answer synchronously or must hand back a future. This is what
//! lets [`sequence`]/[`fallback`]/[`fork`] implement the sync fast path —
//! they only wrap a child's future in a Promise (on the JS side) when a
//! child actually returned one.

pub mod adapter;
pub mod blocking;
pub mod manager;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One of `running`, `success`, `failure` (`§3`). Crosses the JS boundary
/// as the matching lowercase string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  Running,
  Success,
  Failure,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Running => "running",
      Status::Success => "success",
      Status::Failure => "failure",
    }
  }

  pub fn from_str(s: &str) -> Option<Self> {
    match s {
      "running" => Some(Status::Running),
      "success" => Some(Status::Success),
      "failure" => Some(Status::Failure),
      _ => None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    !matches!(self, Status::Running)
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A boxed future resolving to a [`Status`], used when a tick could not
/// answer synchronously.
pub type StatusFuture = Pin<Box<dyn Future<Output = Status> + Send>>;

/// The result of ticking a node: either a `Status` obtained synchronously,
/// or a future that will produce one. Host callers that just want a
/// `Status` can use [`tick_blocking`]; the `osm:bt` JS binding maps this
/// directly onto the sync-fast-path rule of `§4.5`.
pub enum Outcome {
  Ready(Status),
  Pending(StatusFuture),
}

impl Outcome {
  pub fn ready(status: Status) -> Self {
    Outcome::Ready(status)
  }

  /// Folds into a future regardless of whether the outcome was already
  /// resolved; used by composites once they've seen at least one pending
  /// child and must continue in async style.
  pub fn into_future(self) -> StatusFuture {
    match self {
      Outcome::Ready(status) => Box::pin(async move { status }),
      Outcome::Pending(fut) => fut,
    }
  }
}

/// A tick function: given a node's ordered children, produces an
/// [`Outcome`]. Stateless with respect to the node graph — per-execution
/// state, if any, lives in the closure's captured environment (e.g. an
/// adapter) or inside the node itself, never inside the `Tick` value.
pub type Tick = Arc<dyn Fn(&[Node]) -> Outcome + Send + Sync>;

struct NodeInner {
  tick: Tick,
  children: Vec<Node>,
}

/// An opaque handle to a native BT node (`§3`). Cheap to clone (an `Arc`
/// bump); equality is by identity, matching the spec's requirement that
/// JS-side references are opaque and unwrapped eagerly rather than
/// compared structurally.
#[derive(Clone)]
pub struct Node(Arc<NodeInner>);

impl Node {
  pub fn new(tick: Tick, children: Vec<Node>) -> Self {
    Node(Arc::new(NodeInner { tick, children }))
  }

  pub fn children(&self) -> &[Node] {
    &self.0.children
  }

  /// Ticks this node: calls its `Tick` with its own children.
  pub fn tick(&self) -> Outcome {
    (self.0.tick)(&self.0.children)
  }
}

impl PartialEq for Node {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}
impl Eq for Node {}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("ptr", &Arc::as_ptr(&self.0))
      .field("children", &self.0.children.len())
      .finish()
  }
}

/// Ticks `node`, blocking the current thread if it didn't resolve
/// synchronously. Intended for host callers (the Manager/Ticker, tests)
/// that just want a `Status` and are not themselves on the Event Loop.
pub fn tick_blocking(node: &Node) -> Status {
  match node.tick() {
    Outcome::Ready(status) => status,
    Outcome::Pending(fut) => futures::executor::block_on(fut),
  }
}

fn tick_child(child: &Node) -> Outcome {
  child.tick()
}

/// `sequence(children)`: ticks children in order; the first non-`success`
/// short-circuits. Implements the sync fast path: if every child observed
/// so far answered synchronously, the whole composite answers
/// synchronously too.
pub fn sequence(children: Vec<Node>) -> Node {
  let tick: Tick = Arc::new(|children: &[Node]| -> Outcome {
    run_composite(children, Status::Success, Status::Failure)
  });
  Node::new(tick, children)
}

/// `fallback(children)` (aka `selector`): ticks children in order; the
/// first non-`failure` short-circuits.
pub fn fallback(children: Vec<Node>) -> Node {
  let tick: Tick = Arc::new(|children: &[Node]| -> Outcome {
    run_composite(children, Status::Failure, Status::Success)
  });
  Node::new(tick, children)
}

/// Shared sequence/fallback driver. `continue_on` is the status that keeps
/// the loop going to the next child (`Success` for sequence, `Failure` for
/// fallback); reaching the end of the children list without a short
/// circuit yields `continue_on`'s counterpart status.
fn run_composite(
  children: &[Node],
  continue_on: Status,
  on_exhausted: Status,
) -> Outcome {
  let children = children.to_vec();

  for (i, child) in children.iter().enumerate() {
    match tick_child(child) {
      Outcome::Ready(status) => {
        if status != continue_on {
          return Outcome::ready(status);
        }
      }
      Outcome::Pending(fut) => {
        let remaining = children[i + 1..].to_vec();
        return Outcome::Pending(Box::pin(async move {
          let mut status = fut.await;
          if status != continue_on {
            return status;
          }
          for child in &remaining {
            status = match tick_child(child) {
              Outcome::Ready(s) => s,
              Outcome::Pending(f) => f.await,
            };
            if status != continue_on {
              return status;
            }
          }
          on_exhausted
        }));
      }
    }
  }
  Outcome::ready(on_exhausted)
}

/// `fork(children)`: ticks every child on every activation (no
/// short-circuiting). `running` if any child is `running`; `failure` if
/// any child is `failure` and none are `running`; `success` only if every
/// child succeeded. The spec names `fork()` as a parallel combinator
/// without spelling out its join policy; this "fail fast, else wait for
/// all" rule is the conventional BT parallel-AND semantics and is recorded
/// as a deliberate choice in `DESIGN.md`.
pub fn fork(children: Vec<Node>) -> Node {
  let tick: Tick = Arc::new(|children: &[Node]| -> Outcome {
    let children = children.to_vec();
    let outcomes: Vec<Outcome> = children.iter().map(tick_child).collect();

    if outcomes.iter().all(|o| matches!(o, Outcome::Ready(_))) {
      let statuses: Vec<Status> = outcomes
        .into_iter()
        .map(|o| match o {
          Outcome::Ready(s) => s,
          Outcome::Pending(_) => unreachable!(),
        })
        .collect();
      return Outcome::ready(join_fork(statuses));
    }

    Outcome::Pending(Box::pin(async move {
      let mut statuses = Vec::with_capacity(outcomes.len());
      for outcome in outcomes {
        statuses.push(outcome.into_future().await);
      }
      join_fork(statuses)
    }))
  });
  Node::new(tick, children)
}

fn join_fork(statuses: Vec<Status>) -> Status {
  if statuses.iter().any(|s| *s == Status::Running) {
    Status::Running
  } else if statuses.iter().any(|s| *s == Status::Failure) {
    Status::Failure
  } else {
    Status::Success
  }
}

/// Wraps `inner` so `success`/`failure` are swapped; `running` passes
/// through unchanged.
pub fn not(inner: Tick) -> Tick {
  Arc::new(move |children: &[Node]| -> Outcome {
    match inner(children) {
      Outcome::Ready(status) => Outcome::ready(invert(status)),
      Outcome::Pending(fut) => Outcome::Pending(Box::pin(async move { invert(fut.await) })),
    }
  })
}

fn invert(status: Status) -> Status {
  match status {
    Status::Success => Status::Failure,
    Status::Failure => Status::Success,
    Status::Running => Status::Running,
  }
}

/// Forces `inner` onto the async path even if it would have resolved
/// synchronously. Useful when a caller wants consistent Promise behavior
/// regardless of the wrapped tick's actual timing.
pub fn async_(inner: Tick) -> Tick {
  Arc::new(move |children: &[Node]| -> Outcome {
    let fut = inner(children).into_future();
    Outcome::Pending(Box::pin(async move { fut.await }))
  })
}

/// Caches the first terminal (`success`/`failure`) result `inner`
/// produces and replays it on every later call without re-invoking
/// `inner`, until the cache is cleared. `running` results are never
/// cached. Named after the classic BT "memoized sequence" decorator.
pub fn memorize(inner: Tick) -> Tick {
  use parking_lot::Mutex;
  let cache: Arc<Mutex<Option<Status>>> = Arc::new(Mutex::new(None));

  Arc::new(move |children: &[Node]| -> Outcome {
    if let Some(status) = *cache.lock() {
      return Outcome::ready(status);
    }
    let cache = cache.clone();
    match inner(children) {
      Outcome::Ready(status) => {
        if status.is_terminal() {
          *cache.lock() = Some(status);
        }
        Outcome::ready(status)
      }
      Outcome::Pending(fut) => Outcome::Pending(Box::pin(async move {
        let status = fut.await;
        if status.is_terminal() {
          *cache.lock() = Some(status);
        }
        status
      })),
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn leaf(status: Status) -> Node {
    let tick: Tick = Arc::new(move |_children: &[Node]| Outcome::ready(status));
    Node::new(tick, vec![])
  }

  #[test]
  fn sequence_sync_fast_path() {
    let node = sequence(vec![leaf(Status::Success), leaf(Status::Success)]);
    match node.tick() {
      Outcome::Ready(status) => assert_eq!(status, Status::Success),
      Outcome::Pending(_) => panic!("expected synchronous result"),
    }
  }

  #[test]
  fn sequence_short_circuits_on_failure() {
    let node = sequence(vec![leaf(Status::Failure), leaf(Status::Success)]);
    assert_eq!(tick_blocking(&node), Status::Failure);
  }

  #[test]
  fn fallback_sync_fast_path() {
    let node = fallback(vec![leaf(Status::Failure), leaf(Status::Success)]);
    match node.tick() {
      Outcome::Ready(status) => assert_eq!(status, Status::Success),
      Outcome::Pending(_) => panic!("expected synchronous result"),
    }
  }

  #[test]
  fn fork_success_requires_all_children() {
    let node = fork(vec![leaf(Status::Success), leaf(Status::Success)]);
    assert_eq!(tick_blocking(&node), Status::Success);

    let node = fork(vec![leaf(Status::Success), leaf(Status::Failure)]);
    assert_eq!(tick_blocking(&node), Status::Failure);

    let node = fork(vec![leaf(Status::Running), leaf(Status::Failure)]);
    assert_eq!(tick_blocking(&node), Status::Running);
  }

  #[test]
  fn not_inverts_terminal_status() {
    let tick: Tick = not(Arc::new(|_: &[Node]| Outcome::ready(Status::Success)));
    let node = Node::new(tick, vec![]);
    assert_eq!(tick_blocking(&node), Status::Failure);
  }

  #[test]
  fn memorize_caches_terminal_result() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let tick: Tick = memorize(Arc::new(move |_: &[Node]| {
      calls2.fetch_add(1, Ordering::SeqCst);
      Outcome::ready(Status::Success)
    }));
    let node = Node::new(tick, vec![]);
    assert_eq!(tick_blocking(&node), Status::Success);
    assert_eq!(tick_blocking(&node), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn node_equality_is_by_identity() {
    let a = leaf(Status::Success);
    let b = a.clone();
    let c = leaf(Status::Success);
    assert_eq!(a, b);
    assert_ne!(a, c);
  }
}
