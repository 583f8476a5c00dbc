//! Tape-based reverse-mode automatic differentiation.
//!
//! Records a computation graph (forward pass), then computes gradients in one
//! of two ways:
//!
//! - [`backward`](Tape::backward): a numeric sweep that fills adjoints for every
//!   node. One forward + one backward pass regardless of the number of inputs.
//! - [`grad`](Tape::grad): a *graph-mode* sweep that records the adjoint
//!   computation itself as new nodes on the same tape. The returned gradient
//!   handles are ordinary [`Var`]s, so they can be differentiated again
//!   (second derivatives) or fed into further computation whose final output
//!   is swept by [`backward`](Tape::backward).
//!
//! # Example
//! ```
//! use inferno_ad::tape::Tape;
//!
//! let mut tape = Tape::new();
//! let x = tape.var(3.0);
//! let x3 = tape.powi(x, 3);            // x^3 = 27
//! let g = tape.grad(x3, &[x]).unwrap(); // 3x^2 = 27, recorded on the tape
//! let h = tape.grad(g[0], &[x]).unwrap(); // 6x = 18
//! assert_eq!(tape.val(g[0]), 27.0);
//! assert_eq!(tape.val(h[0]), 18.0);
//!
//! tape.backward(h[0]);
//! assert_eq!(tape.adjoint(x), 6.0);    // d(6x)/dx
//! ```

use statrs::function::gamma::{digamma, ln_gamma};

/// Handle to a node on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

impl Var {
    /// Position of the node on its tape.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Operation recorded on the tape.
#[derive(Debug, Clone, Copy)]
enum Op {
    /// Input variable (leaf).
    Input,
    /// Constant (adjoint never propagated).
    Const,
    // Binary ops
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    // Unary ops
    Neg(usize),
    Ln(usize),
    Exp(usize),
    Sqrt(usize),
    Abs(usize),
    Powf(usize, f64),
    Powi(usize, i32),
    /// `ln Γ(a)`. Numeric backward only.
    LnGamma(usize),
    /// Max(a, b): gradient flows to the winner only.
    Max(usize, usize),
}

impl Op {
    /// Operand indices (up to two).
    #[inline]
    fn operands(self) -> [Option<usize>; 2] {
        match self {
            Op::Input | Op::Const => [None, None],
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::Div(a, b) | Op::Max(a, b) => {
                [Some(a), Some(b)]
            }
            Op::Neg(a)
            | Op::Ln(a)
            | Op::Exp(a)
            | Op::Sqrt(a)
            | Op::Abs(a)
            | Op::Powf(a, _)
            | Op::Powi(a, _)
            | Op::LnGamma(a) => [Some(a), None],
        }
    }
}

/// Node on the tape: value + operation that produced it.
#[derive(Debug, Clone)]
struct Node {
    val: f64,
    op: Op,
}

/// Error returned by [`Tape::grad`] when an active node has no graph-mode derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphGradError {
    /// Name of the offending operation.
    pub op: &'static str,
    /// Tape index of the offending node.
    pub node: usize,
}

impl std::fmt::Display for GraphGradError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation `{}` at node {} has no graph-mode derivative", self.op, self.node)
    }
}

impl std::error::Error for GraphGradError {}

/// Reverse-mode AD tape.
///
/// Build a computation graph by calling methods (var, add, mul, ln, …),
/// then call [`backward`](Tape::backward) and read gradients with [`adjoint`](Tape::adjoint),
/// or call [`grad`](Tape::grad) for gradients that stay on the tape.
#[derive(Debug)]
pub struct Tape {
    nodes: Vec<Node>,
    adjoints: Vec<f64>,
}

impl Tape {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self { nodes: Vec::new(), adjoints: Vec::new() }
    }

    /// Create a tape pre-allocated for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { nodes: Vec::with_capacity(capacity), adjoints: Vec::with_capacity(capacity) }
    }

    /// Number of nodes on the tape.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tape is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clear the tape for reuse (avoids reallocation).
    #[inline]
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.adjoints.clear();
    }

    /// Drop every node recorded at or after position `len`.
    ///
    /// Handles to dropped nodes become dangling; callers must only keep
    /// [`Var`]s with `index() < len`.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
        self.adjoints.truncate(len);
    }

    #[inline]
    fn push(&mut self, val: f64, op: Op) -> Var {
        let idx = self.nodes.len();
        self.nodes.push(Node { val, op });
        Var(idx)
    }

    // --- Leaf constructors ---

    /// Record an input variable.
    #[inline]
    pub fn var(&mut self, val: f64) -> Var {
        self.push(val, Op::Input)
    }

    /// Record a constant (gradient never flows through it).
    #[inline]
    pub fn constant(&mut self, val: f64) -> Var {
        self.push(val, Op::Const)
    }

    /// Constant copy of `v`'s current value: cuts the graph at `v`.
    #[inline]
    pub fn detach(&mut self, v: Var) -> Var {
        let val = self.val(v);
        self.constant(val)
    }

    // --- Value access ---

    /// Get the primal value of a node.
    #[inline]
    pub fn val(&self, v: Var) -> f64 {
        self.nodes[v.0].val
    }

    /// Primal values of a slice of nodes.
    pub fn vals(&self, vs: &[Var]) -> Vec<f64> {
        vs.iter().map(|&v| self.val(v)).collect()
    }

    // --- Binary operations ---

    /// `a + b`
    #[inline]
    pub fn add(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val + self.nodes[b.0].val;
        self.push(val, Op::Add(a.0, b.0))
    }

    /// `a - b`
    #[inline]
    pub fn sub(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val - self.nodes[b.0].val;
        self.push(val, Op::Sub(a.0, b.0))
    }

    /// `a * b`
    #[inline]
    pub fn mul(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val * self.nodes[b.0].val;
        self.push(val, Op::Mul(a.0, b.0))
    }

    /// `a / b`
    #[inline]
    pub fn div(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val / self.nodes[b.0].val;
        self.push(val, Op::Div(a.0, b.0))
    }

    /// `max(a, b)`; the gradient flows to the winner.
    #[inline]
    pub fn max(&mut self, a: Var, b: Var) -> Var {
        let va = self.nodes[a.0].val;
        let vb = self.nodes[b.0].val;
        let val = if va >= vb { va } else { vb };
        self.push(val, Op::Max(a.0, b.0))
    }

    /// `min(a, b)` as `-max(-a, -b)`.
    pub fn min(&mut self, a: Var, b: Var) -> Var {
        let na = self.neg(a);
        let nb = self.neg(b);
        let m = self.max(na, nb);
        self.neg(m)
    }

    // --- Unary operations ---

    /// `-a`
    #[inline]
    pub fn neg(&mut self, a: Var) -> Var {
        let val = -self.nodes[a.0].val;
        self.push(val, Op::Neg(a.0))
    }

    /// `ln(a)`
    #[inline]
    pub fn ln(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.ln();
        self.push(val, Op::Ln(a.0))
    }

    /// `exp(a)`
    #[inline]
    pub fn exp(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.exp();
        self.push(val, Op::Exp(a.0))
    }

    /// `sqrt(a)`
    #[inline]
    pub fn sqrt(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.sqrt();
        self.push(val, Op::Sqrt(a.0))
    }

    /// `|a|` (derivative taken as +1 at zero)
    #[inline]
    pub fn abs(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.abs();
        self.push(val, Op::Abs(a.0))
    }

    /// `a^n` (float exponent)
    pub fn powf(&mut self, a: Var, n: f64) -> Var {
        let val = self.nodes[a.0].val.powf(n);
        self.push(val, Op::Powf(a.0, n))
    }

    /// `a^n` (integer exponent)
    pub fn powi(&mut self, a: Var, n: i32) -> Var {
        let val = self.nodes[a.0].val.powi(n);
        self.push(val, Op::Powi(a.0, n))
    }

    /// `ln Γ(a)`.
    ///
    /// Differentiable by [`backward`](Tape::backward) (digamma) only;
    /// [`grad`](Tape::grad) rejects it when it lies on an active path.
    pub fn ln_gamma(&mut self, a: Var) -> Var {
        let val = ln_gamma(self.nodes[a.0].val);
        self.push(val, Op::LnGamma(a.0))
    }

    // --- Convenience: scalar helpers ---

    /// `a + scalar`
    #[inline]
    pub fn add_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.add(a, c)
    }

    /// `a - scalar`
    #[inline]
    pub fn sub_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.sub(a, c)
    }

    /// `scalar - a`
    #[inline]
    pub fn f64_sub(&mut self, s: f64, a: Var) -> Var {
        let c = self.constant(s);
        self.sub(c, a)
    }

    /// `a * scalar`
    #[inline]
    pub fn mul_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.mul(a, c)
    }

    /// `a / scalar`
    #[inline]
    pub fn div_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.div(a, c)
    }

    /// `scalar / a`
    #[inline]
    pub fn f64_div(&mut self, s: f64, a: Var) -> Var {
        let c = self.constant(s);
        self.div(c, a)
    }

    /// `max(a, scalar)`
    #[inline]
    pub fn max_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.max(a, c)
    }

    /// Clamp `a` into `[lo, hi]`. Outside the interval the result is a
    /// constant (zero gradient), inside it is `a` itself.
    pub fn clamp(&mut self, a: Var, lo: f64, hi: f64) -> Var {
        let v = self.val(a);
        if v > hi {
            self.constant(hi)
        } else if v < lo {
            self.constant(lo)
        } else {
            a
        }
    }

    /// Sum of `vs` (a zero constant for an empty slice).
    pub fn sum(&mut self, vs: &[Var]) -> Var {
        match vs.split_first() {
            None => self.constant(0.0),
            Some((&first, rest)) => rest.iter().fold(first, |acc, &v| self.add(acc, v)),
        }
    }

    // --- Backward pass ---

    /// Run reverse-mode AD from output node `out`.
    ///
    /// After calling this, use [`adjoint`](Tape::adjoint) to read ∂out/∂x
    /// for any input `x`.
    pub fn backward(&mut self, out: Var) {
        let n = self.nodes.len();
        self.adjoints.resize(n, 0.0);
        self.adjoints.fill(0.0);
        self.adjoints[out.0] = 1.0;

        for i in (0..=out.0).rev() {
            let adj = self.adjoints[i];
            if adj == 0.0 {
                continue; // skip zero-adjoint nodes
            }

            match self.nodes[i].op {
                Op::Input | Op::Const => {}
                Op::Add(a, b) => {
                    self.adjoints[a] += adj;
                    self.adjoints[b] += adj;
                }
                Op::Sub(a, b) => {
                    self.adjoints[a] += adj;
                    self.adjoints[b] -= adj;
                }
                Op::Mul(a, b) => {
                    let va = self.nodes[a].val;
                    let vb = self.nodes[b].val;
                    self.adjoints[a] += adj * vb;
                    self.adjoints[b] += adj * va;
                }
                Op::Div(a, b) => {
                    let va = self.nodes[a].val;
                    let vb = self.nodes[b].val;
                    self.adjoints[a] += adj / vb;
                    self.adjoints[b] -= adj * va / (vb * vb);
                }
                Op::Neg(a) => {
                    self.adjoints[a] -= adj;
                }
                Op::Ln(a) => {
                    self.adjoints[a] += adj / self.nodes[a].val;
                }
                Op::Exp(a) => {
                    // d/da exp(a) = exp(a) = self.nodes[i].val
                    self.adjoints[a] += adj * self.nodes[i].val;
                }
                Op::Sqrt(a) => {
                    self.adjoints[a] += adj * 0.5 / self.nodes[i].val;
                }
                Op::Abs(a) => {
                    let s = if self.nodes[a].val >= 0.0 { 1.0 } else { -1.0 };
                    self.adjoints[a] += adj * s;
                }
                Op::Powf(a, n) => {
                    // d/da a^n = n * a^(n-1)
                    self.adjoints[a] += adj * n * self.nodes[a].val.powf(n - 1.0);
                }
                Op::Powi(a, n) => {
                    self.adjoints[a] += adj * (n as f64) * self.nodes[a].val.powi(n - 1);
                }
                Op::LnGamma(a) => {
                    self.adjoints[a] += adj * digamma(self.nodes[a].val);
                }
                Op::Max(a, b) => {
                    // Gradient flows to the winner
                    if self.nodes[a].val >= self.nodes[b].val {
                        self.adjoints[a] += adj;
                    } else {
                        self.adjoints[b] += adj;
                    }
                }
            }
        }
    }

    /// Read ∂output/∂v after calling [`backward`](Tape::backward).
    #[inline]
    pub fn adjoint(&self, v: Var) -> f64 {
        self.adjoints.get(v.0).copied().unwrap_or(0.0)
    }

    // --- Graph-mode gradient ---

    /// Gradient of `out` with respect to each of `wrt`, recorded on the tape.
    ///
    /// The `wrt` nodes are treated as independent: the sweep never crosses
    /// them, so an intermediate node (e.g. a parameter produced by a previous
    /// optimizer step) gets the partial derivative holding its own inputs
    /// fixed. Only nodes that depend on some `wrt` are differentiated, which
    /// keeps the sweep restricted to `[min(wrt), out]` and skips constant
    /// sub-graphs entirely.
    ///
    /// Entries for `wrt` nodes that `out` does not depend on are zero constants.
    pub fn grad(&mut self, out: Var, wrt: &[Var]) -> Result<Vec<Var>, GraphGradError> {
        let Some(lo) = wrt.iter().map(|v| v.0).min() else {
            return Ok(Vec::new());
        };
        let hi = out.0;
        if hi < lo {
            return Ok(wrt.iter().map(|_| self.constant(0.0)).collect());
        }

        let span = hi - lo + 1;
        let mut is_wrt = vec![false; span];
        for w in wrt {
            if w.0 <= hi {
                is_wrt[w.0 - lo] = true;
            }
        }

        // Forward activity: a node is active if it is a `wrt` or reads an active node.
        let mut active = is_wrt.clone();
        for i in lo..=hi {
            if active[i - lo] {
                continue;
            }
            active[i - lo] = self.nodes[i]
                .op
                .operands()
                .iter()
                .flatten()
                .any(|&o| o >= lo && active[o - lo]);
        }

        let mut adj: Vec<Option<Var>> = vec![None; span];
        if active[hi - lo] {
            adj[hi - lo] = Some(self.constant(1.0));
        }

        for i in (lo..=hi).rev() {
            if !active[i - lo] || is_wrt[i - lo] {
                continue;
            }
            let Some(g) = adj[i - lo] else {
                continue;
            };
            let op = self.nodes[i].op;
            match op {
                Op::Input | Op::Const => {}
                Op::Add(a, b) => {
                    self.accumulate(&mut adj, &active, lo, a, g);
                    self.accumulate(&mut adj, &active, lo, b, g);
                }
                Op::Sub(a, b) => {
                    self.accumulate(&mut adj, &active, lo, a, g);
                    if Self::is_active(&active, lo, b) {
                        let c = self.neg(g);
                        self.accumulate(&mut adj, &active, lo, b, c);
                    }
                }
                Op::Mul(a, b) => {
                    if Self::is_active(&active, lo, a) {
                        let c = self.mul(g, Var(b));
                        self.accumulate(&mut adj, &active, lo, a, c);
                    }
                    if Self::is_active(&active, lo, b) {
                        let c = self.mul(g, Var(a));
                        self.accumulate(&mut adj, &active, lo, b, c);
                    }
                }
                Op::Div(a, b) => {
                    if Self::is_active(&active, lo, a) {
                        let c = self.div(g, Var(b));
                        self.accumulate(&mut adj, &active, lo, a, c);
                    }
                    if Self::is_active(&active, lo, b) {
                        // d(a/b)/db = -(a/b)/b
                        let gq = self.mul(g, Var(i));
                        let t = self.div(gq, Var(b));
                        let c = self.neg(t);
                        self.accumulate(&mut adj, &active, lo, b, c);
                    }
                }
                Op::Neg(a) => {
                    let c = self.neg(g);
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Ln(a) => {
                    let c = self.div(g, Var(a));
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Exp(a) => {
                    let c = self.mul(g, Var(i));
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Sqrt(a) => {
                    let half = self.mul_f64(g, 0.5);
                    let c = self.div(half, Var(i));
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Abs(a) => {
                    let c = if self.nodes[a].val >= 0.0 { g } else { self.neg(g) };
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Powf(a, n) => {
                    let p = self.powf(Var(a), n - 1.0);
                    let np = self.mul_f64(p, n);
                    let c = self.mul(g, np);
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::Powi(a, n) => {
                    let c = match n {
                        0 => continue,
                        1 => g,
                        _ => {
                            let p = self.powi(Var(a), n - 1);
                            let np = self.mul_f64(p, n as f64);
                            self.mul(g, np)
                        }
                    };
                    self.accumulate(&mut adj, &active, lo, a, c);
                }
                Op::LnGamma(_) => {
                    return Err(GraphGradError { op: "ln_gamma", node: i });
                }
                Op::Max(a, b) => {
                    let winner = if self.nodes[a].val >= self.nodes[b].val { a } else { b };
                    self.accumulate(&mut adj, &active, lo, winner, g);
                }
            }
        }

        Ok(wrt
            .iter()
            .map(|w| {
                if w.0 <= hi {
                    adj[w.0 - lo].unwrap_or_else(|| self.constant(0.0))
                } else {
                    self.constant(0.0)
                }
            })
            .collect())
    }

    #[inline]
    fn is_active(active: &[bool], lo: usize, node: usize) -> bool {
        node >= lo && active[node - lo]
    }

    #[inline]
    fn accumulate(&mut self, adj: &mut [Option<Var>], active: &[bool], lo: usize, target: usize, contrib: Var) {
        if !Self::is_active(active, lo, target) {
            return;
        }
        let slot = &mut adj[target - lo];
        *slot = Some(match *slot {
            None => contrib,
            Some(prev) => self.add(prev, contrib),
        });
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}
