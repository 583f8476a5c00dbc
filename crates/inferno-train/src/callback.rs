//! Training-loop hooks and the inference-aware loss.
//!
//! The driver owns the model, the optimizer and the batches. Per batch it
//! calls `on_batch_begin`, runs the forward pass on a fresh tape, calls
//! `on_forwards_end` with a [`BatchContext`], back-propagates
//! [`BatchContext::loss`] (training phase only) and calls `on_batch_end`.
//! Epochs are bracketed by `on_epoch_begin` / `on_epoch_end`, once for the
//! training pass and once for the validation pass.

use inferno_ad::{Tape, Var};
use inferno_core::{Error, FisherResult, ProfileCurve, Result};
use inferno_inference::profile_likelihood::validate_scan;
use inferno_inference::{
    AsimovModel, AuxConstraints, NewtonProfiler, NuisanceLayout, ProfilerConfig, Variations, fisher, likelihood_width,
    linspace_step, profile_curve,
};
use serde::{Deserialize, Serialize};

use crate::model::Classifier;
use crate::shape::to_shape;
use crate::systematics::SystematicSet;

/// Which pass a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Weights are updated from the loss.
    Train,
    /// Loss is only recorded.
    Valid,
}

/// Flags callbacks may set at the start of training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainFlags {
    /// The loss is produced by a callback; the driver's own loss function is a no-op.
    pub external_loss: bool,
    /// Emitted losses are per-event means (re-weighted by batch size when averaging).
    pub loss_is_meaned: bool,
}

impl Default for TrainFlags {
    fn default() -> Self {
        Self { external_loss: false, loss_is_meaned: true }
    }
}

/// Epoch boundary information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochContext {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Pass that is starting or ending.
    pub phase: Phase,
}

/// Everything a callback may read or write for one batch.
pub struct BatchContext<'a, M: ?Sized> {
    /// Tape holding the forward pass.
    pub tape: &'a mut Tape,
    /// The classifier (for side-channel forward passes).
    pub model: &'a M,
    /// Batch features.
    pub inputs: &'a [Vec<f64>],
    /// Batch class labels (`1` signal, `0` background).
    pub labels: &'a [u8],
    /// Classifier outputs on the tape, one row per event.
    pub outputs: &'a [Vec<Var>],
    /// Current pass.
    pub phase: Phase,
    /// Flags as settled by `on_train_begin`.
    pub flags: TrainFlags,
    /// Scalar loss for this batch, written by the loss callback.
    pub loss: Option<Var>,
}

/// Hooks invoked by the training driver. All default to no-ops.
pub trait Callback<M: Classifier + ?Sized> {
    /// Before the first epoch.
    fn on_train_begin(&mut self, _flags: &mut TrainFlags) {}
    /// After the last epoch.
    fn on_train_end(&mut self) {}
    /// Start of a training or validation pass.
    fn on_epoch_begin(&mut self, _ctx: &EpochContext) {}
    /// End of a training or validation pass.
    fn on_epoch_end(&mut self, _ctx: &EpochContext) {}
    /// Before the forward pass.
    fn on_batch_begin(&mut self) {}
    /// After the forward pass, before back-propagation.
    fn on_forwards_end(&mut self, _ctx: &mut BatchContext<'_, M>) -> Result<()> {
        Ok(())
    }
    /// After the optimizer step (or after recording, in validation).
    fn on_batch_end(&mut self) {}
}

/// Quantity exposed as the batch loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossMode {
    /// Inverse Fisher information of mu at the true point.
    #[default]
    Fisher,
    /// Half-width of the profiled likelihood interval.
    Curve,
}

/// Settings for [`InfernoLoss`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfernoConfig {
    /// Total expected events (signal + background).
    pub n: f64,
    /// True signal yield.
    pub true_mu: f64,
    /// POI scan for curve mode.
    pub mu_scan: Vec<f64>,
    /// Loss quantity.
    pub mode: LossMode,
    /// Newton profiler settings.
    pub profiler: ProfilerConfig,
    /// `ΔNLL` defining the interval in curve mode.
    pub width_threshold: f64,
    /// Signal-normalization nuisances.
    pub n_s_norm: usize,
    /// Background-normalization nuisances.
    pub n_b_norm: usize,
    /// Auxiliary constraints (none: all nuisances free).
    pub constraints: AuxConstraints,
}

impl Default for InfernoConfig {
    fn default() -> Self {
        Self {
            n: 1050.0,
            true_mu: 50.0,
            mu_scan: (20..=80).map(f64::from).collect(),
            mode: LossMode::Fisher,
            profiler: ProfilerConfig::default(),
            width_threshold: 0.5,
            n_s_norm: 0,
            n_b_norm: 0,
            constraints: AuxConstraints::default(),
        }
    }
}

impl InfernoConfig {
    /// Scan `start..=stop` in steps of `step`.
    pub fn with_scan(mut self, start: f64, stop: f64, step: f64) -> Result<Self> {
        self.mu_scan = linspace_step(start, stop, step)?;
        Ok(self)
    }

    /// Background true yield `n - true_mu`.
    pub fn b_true(&self) -> f64 {
        self.n - self.true_mu
    }

    /// Reject inconsistent settings before any batch runs.
    pub fn validate(&self) -> Result<()> {
        if !self.true_mu.is_finite() || self.true_mu <= 0.0 {
            return Err(Error::Validation(format!("true_mu must be finite and > 0, got {}", self.true_mu)));
        }
        if !self.n.is_finite() || self.n <= self.true_mu {
            return Err(Error::Validation(format!(
                "n ({}) must exceed true_mu ({})",
                self.n, self.true_mu
            )));
        }
        if !self.width_threshold.is_finite() || self.width_threshold <= 0.0 {
            return Err(Error::Validation(format!(
                "width_threshold must be finite and > 0, got {}",
                self.width_threshold
            )));
        }
        if self.mode == LossMode::Curve {
            validate_scan(&self.mu_scan)?;
        }
        self.profiler.validate()
    }
}

/// Per-batch result kept until `on_batch_end`.
#[derive(Debug, Clone)]
pub enum BatchDiagnostics {
    /// Fisher-mode result.
    Fisher(FisherResult),
    /// Curve-mode profiled curve.
    Curve(ProfileCurve),
}

/// Inference-aware loss: profiles the binned likelihood built from the
/// classifier's own outputs and exposes its precision as the loss.
#[derive(Debug, Clone)]
pub struct InfernoLoss {
    config: InfernoConfig,
    systematics: SystematicSet,
    profiler: NewtonProfiler,
    diagnostics: Option<BatchDiagnostics>,
}

impl InfernoLoss {
    /// Validate the configuration against the nuisance set.
    pub fn new(config: InfernoConfig, systematics: SystematicSet) -> Result<Self> {
        config.validate()?;
        let n_shape = systematics.len();
        let layout = NuisanceLayout { n_shape, n_s_norm: config.n_s_norm, n_b_norm: config.n_b_norm };
        config.constraints.check(&layout)?;
        let profiler = NewtonProfiler::new(config.profiler)?;
        Ok(Self { config, systematics, profiler, diagnostics: None })
    }

    /// Active configuration.
    pub fn config(&self) -> &InfernoConfig {
        &self.config
    }

    /// Result of the current batch (cleared at batch end).
    pub fn diagnostics(&self) -> Option<&BatchDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Build the binned model for one batch and return the loss node.
    pub fn batch_loss<M: Classifier + ?Sized>(&mut self, ctx: &mut BatchContext<'_, M>) -> Result<Var> {
        if ctx.labels.len() != ctx.outputs.len() || ctx.inputs.len() != ctx.outputs.len() {
            return Err(Error::Validation(format!(
                "batch has {} inputs, {} labels, {} outputs",
                ctx.inputs.len(),
                ctx.labels.len(),
                ctx.outputs.len()
            )));
        }
        let mut sig = Vec::new();
        let mut bkg = Vec::new();
        let mut bkg_inputs = Vec::new();
        for (i, &label) in ctx.labels.iter().enumerate() {
            match label {
                1 => sig.push(ctx.outputs[i].clone()),
                0 => {
                    bkg.push(ctx.outputs[i].clone());
                    bkg_inputs.push(ctx.inputs[i].clone());
                }
                other => return Err(Error::Validation(format!("event {i} has label {other}, expected 0 or 1"))),
            }
        }
        if sig.is_empty() {
            return Err(Error::Validation("batch contains no signal events".into()));
        }
        if bkg.is_empty() {
            return Err(Error::Validation("batch contains no background events".into()));
        }

        let tape = &mut *ctx.tape;
        let f_s = to_shape(tape, &sig)?;
        let f_b = to_shape(tape, &bkg)?;

        let cfg = &self.config;
        let mut builder = AsimovModel::builder(cfg.true_mu, cfg.b_true(), f_s, f_b)
            .norm_nuisances(cfg.n_s_norm, cfg.n_b_norm)
            .constraints(cfg.constraints.clone());
        if !self.systematics.is_empty() {
            let (up, down) = self.systematics.variation_shapes(ctx.model, &bkg_inputs)?;
            builder = builder.background_variations(Variations::constants(tape, &up, &down));
        }
        let model = builder.build()?;

        let (loss, diag) = match cfg.mode {
            LossMode::Fisher => {
                let fi = fisher(tape, &model, &self.profiler, cfg.true_mu)?;
                (fi.poi_variance(), BatchDiagnostics::Fisher(fi.to_result(tape)))
            }
            LossMode::Curve => {
                let curve = profile_curve(tape, &model, &self.profiler, &cfg.mu_scan)?;
                let width = likelihood_width(tape, &curve.mu, &curve.nll, cfg.width_threshold)?;
                (width, BatchDiagnostics::Curve(curve.to_profile_curve(tape)))
            }
        };
        log::debug!("{:?} batch: {} sig / {} bkg, loss={:.6}", ctx.phase, sig.len(), bkg.len(), tape.val(loss));
        self.diagnostics = Some(diag);
        Ok(loss)
    }
}

impl<M: Classifier + ?Sized> Callback<M> for InfernoLoss {
    fn on_train_begin(&mut self, flags: &mut TrainFlags) {
        flags.external_loss = true;
        flags.loss_is_meaned = false;
    }

    fn on_forwards_end(&mut self, ctx: &mut BatchContext<'_, M>) -> Result<()> {
        let loss = self.batch_loss(ctx)?;
        ctx.loss = Some(loss);
        Ok(())
    }

    fn on_batch_end(&mut self) {
        self.diagnostics = None;
    }
}

/// Per-epoch mean training and validation losses.
#[derive(Debug, Clone, Default)]
pub struct LossTracker {
    /// Mean training loss per epoch.
    pub train: Vec<f64>,
    /// Mean validation loss per epoch.
    pub valid: Vec<f64>,
    sum: f64,
    count: usize,
}

impl LossTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed epochs (validation passes).
    pub fn epochs(&self) -> usize {
        self.valid.len()
    }
}

impl<M: Classifier + ?Sized> Callback<M> for LossTracker {
    fn on_train_begin(&mut self, _flags: &mut TrainFlags) {
        *self = Self::default();
    }

    fn on_epoch_begin(&mut self, _ctx: &EpochContext) {
        self.sum = 0.0;
        self.count = 0;
    }

    fn on_forwards_end(&mut self, ctx: &mut BatchContext<'_, M>) -> Result<()> {
        let Some(loss) = ctx.loss else { return Ok(()) };
        let weight = if ctx.flags.loss_is_meaned { ctx.inputs.len() } else { 1 };
        self.sum += ctx.tape.val(loss) * weight as f64;
        self.count += weight;
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &EpochContext) {
        let mean = if self.count > 0 { self.sum / self.count as f64 } else { f64::NAN };
        match ctx.phase {
            Phase::Train => self.train.push(mean),
            Phase::Valid => {
                self.valid.push(mean);
                log::info!(
                    "epoch {}: train={:.6} valid={:.6}",
                    ctx.epoch + 1,
                    self.train.last().copied().unwrap_or(f64::NAN),
                    mean
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mlp;

    #[test]
    fn test_default_config() {
        let c = InfernoConfig::default();
        assert_eq!(c.mu_scan.len(), 61);
        assert_eq!(c.b_true(), 1000.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(InfernoConfig { n: 40.0, ..Default::default() }.validate().is_err());
        assert!(InfernoConfig { width_threshold: 0.0, ..Default::default() }.validate().is_err());
        let bad_scan = InfernoConfig { mode: LossMode::Curve, mu_scan: vec![50.0], ..Default::default() };
        assert!(bad_scan.validate().is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let c: InfernoConfig = serde_json::from_str(r#"{"mode": "curve", "profiler": {"n_steps": 12}}"#).unwrap();
        assert_eq!(c.mode, LossMode::Curve);
        assert_eq!(c.profiler.n_steps, 12);
        assert_eq!(c.true_mu, 50.0);
    }

    #[test]
    fn test_train_begin_sets_flags() {
        let mut cb = InfernoLoss::new(InfernoConfig::default(), SystematicSet::default()).unwrap();
        let mut flags = TrainFlags::default();
        <InfernoLoss as Callback<Mlp>>::on_train_begin(&mut cb, &mut flags);
        assert!(flags.external_loss);
        assert!(!flags.loss_is_meaned);
    }

    #[test]
    fn test_loss_tracker_honours_meaned_flag() {
        let model = Mlp::new(&[1, 2], 1.0, 0).unwrap();
        let mut tracker = LossTracker::new();
        let mut flags = TrainFlags::default();
        Callback::<Mlp>::on_train_begin(&mut tracker, &mut flags);

        let outputs: Vec<Vec<Var>> = Vec::new();
        // batches of 4 events at loss 2 and 1 event at loss 7
        for (meaned, expect) in [(true, (2.0 * 4.0 + 7.0) / 5.0), (false, 4.5)] {
            let ep = EpochContext { epoch: 0, phase: Phase::Train };
            Callback::<Mlp>::on_epoch_begin(&mut tracker, &ep);
            for (v, n) in [(2.0, 4), (7.0, 1)] {
                let inputs = vec![vec![0.0]; n];
                let labels = vec![0u8; n];
                let mut tape = Tape::new();
                let loss = tape.constant(v);
                let mut ctx = BatchContext {
                    tape: &mut tape,
                    model: &model,
                    inputs: &inputs,
                    labels: &labels,
                    outputs: &outputs,
                    phase: Phase::Train,
                    flags: TrainFlags { external_loss: true, loss_is_meaned: meaned },
                    loss: Some(loss),
                };
                Callback::<Mlp>::on_forwards_end(&mut tracker, &mut ctx).unwrap();
            }
            Callback::<Mlp>::on_epoch_end(&mut tracker, &ep);
            assert_eq!(*tracker.train.last().unwrap(), expect);
        }
    }
}
