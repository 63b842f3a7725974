use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::activations::Activation;
use crate::checkpoint::Checkpoint;
use crate::env::Space;
use crate::error::{Result, RlError};
use crate::loss::{Loss, LossKind};
use crate::network::{Mlp, Network};
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use crate::replay_buffer::{Memory, PriorityConfig, Transition};
use super::{check_finite_loss, check_observation, Agent, LearnOutcome, LossReport, TargetSync};

/// Bounds of a continuous action space; tanh outputs in `[-1, 1]` map onto them linearly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionBounds {
    pub low: f32,
    pub high: f32,
}

impl ActionBounds {
    pub fn half_range(&self) -> f32 {
        0.5 * (self.high - self.low)
    }

    pub fn scale(&self, raw: &Array2<f32>) -> Array2<f32> {
        let (half, low) = (self.half_range(), self.low);
        raw.mapv(|a| (a + 1.0) * half + low)
    }

    pub(super) fn validate(&self) -> Result<()> {
        if !(self.low.is_finite() && self.high.is_finite() && self.low < self.high) {
            return Err(RlError::invalid_parameter("action_bounds", "low must be finite and below high"));
        }
        Ok(())
    }
}

/// Deep Deterministic Policy Gradient agent for continuous action spaces.
///
/// The actor ends in `tanh` and is rescaled to the action bounds.
/// The critic maps `[state, action]` to a single Q-value. Critic targets are
/// `r + gamma * (1 - done) * Q'(s', pi'(s'))`; the actor ascends
/// `mean Q(s, pi(s))` by back-propagating through the critic, whose own
/// parameters are left unchanged by the actor step.
#[derive(Clone, Debug)]
pub struct DdpgAgent {
    actor: Mlp,
    actor_target: Mlp,
    critic: Mlp,
    critic_target: Mlp,
    memory: Memory<Array1<f32>>,
    observation_size: usize,
    action_dim: usize,
    bounds: ActionBounds,
    /// Gaussian noise std as a fraction of half the action range
    noise_scale: f32,
    gamma: f32,
    actor_lr: f32,
    critic_lr: f32,
    batch_size: usize,
    target_sync: TargetSync,
    loss: LossKind,
    learn_calls: usize,
    rng: StdRng,
}

impl DdpgAgent {
    pub fn actor(&self) -> &Mlp {
        &self.actor
    }

    pub fn critic(&self) -> &Mlp {
        &self.critic
    }

    pub fn actor_target(&self) -> &Mlp {
        &self.actor_target
    }

    pub fn critic_target(&self) -> &Mlp {
        &self.critic_target
    }

    pub fn memory(&self) -> &Memory<Array1<f32>> {
        &self.memory
    }

    pub fn action_bounds(&self) -> (f32, f32) {
        (self.bounds.low, self.bounds.high)
    }

    /// Critic Q-values for a batch of state-action pairs
    pub fn critic_values<'a>(&self, states: ArrayView2<'a, f32>, actions: ArrayView2<'a, f32>) -> Result<Array1<f32>> {
        let inputs = critic_input(states, actions)?;
        Ok(self.critic.forward(inputs.view())?.column(0).to_owned())
    }

    /// Deterministic policy action for one observation
    pub fn policy_action(&self, observation: ArrayView1<f32>) -> Result<Array1<f32>> {
        policy_action(&self.actor, self.bounds, observation, self.observation_size)
    }

    fn sync_targets(&mut self) -> Result<()> {
        if !self.target_sync.is_due(self.learn_calls) {
            return Ok(());
        }
        match self.target_sync {
            TargetSync::Hard { .. } => {
                debug!(learn_calls = self.learn_calls, "hard target sync");
                self.actor_target.hard_update_from(&self.actor)?;
                self.critic_target.hard_update_from(&self.critic)
            }
            TargetSync::Soft { tau } => {
                self.actor_target.soft_update_from(&self.actor, tau)?;
                self.critic_target.soft_update_from(&self.critic, tau)
            }
        }
    }
}

impl Agent for DdpgAgent {
    type Action = Array1<f32>;

    fn select_action(&mut self, observation: ArrayView1<f32>, explore: bool) -> Result<Array1<f32>> {
        let action = self.policy_action(observation)?;
        if !explore {
            return Ok(action);
        }
        add_exploration_noise(action, self.noise_scale, self.bounds, &mut self.rng)
    }

    fn random_action(&mut self) -> Array1<f32> {
        random_action(self.action_dim, self.bounds, &mut self.rng)
    }

    fn observe(&mut self, transition: Transition<Array1<f32>>) -> Result<()> {
        check_continuous_transition(&transition, self.observation_size, self.action_dim)?;
        self.memory.store(transition);
        Ok(())
    }

    fn learn(&mut self) -> Result<LearnOutcome> {
        if self.memory.len() < self.batch_size {
            return Ok(LearnOutcome::Skipped);
        }
        let batch = match self.memory.sample_batch(self.batch_size, &mut self.rng) {
            Ok(batch) => batch,
            Err(RlError::InsufficientData { .. }) => return Ok(LearnOutcome::Skipped),
            Err(e) => return Err(e),
        };
        let actions = stack_actions(&batch.actions, self.action_dim);

        let next_actions = self.bounds.scale(&self.actor_target.forward(batch.next_states.view())?);
        let next_inputs = critic_input(batch.next_states.view(), next_actions.view())?;
        let next_q = self.critic_target.forward(next_inputs.view())?.column(0).to_owned();
        let targets = bootstrap_targets(&batch.rewards, &batch.dones, &next_q, self.gamma);

        // Stage both updates on copies so a failure leaves every network untouched
        let mut critic = self.critic.clone();
        let mut actor = self.actor.clone();
        let weights = batch.weights.as_ref().map(|w| w.view());
        let inputs = critic_input(batch.states.view(), actions.view())?;
        let (loss, td_errors) = fit_critic(&mut critic, self.loss, inputs.view(), &targets, weights, self.critic_lr)?;
        let actor_loss = ascend_policy(&mut actor, &mut critic, batch.states.view(), self.bounds, self.actor_lr)?;
        self.memory.update_priorities(&batch.indices, &td_errors.to_vec())?;

        self.critic = critic;
        self.actor = actor;
        self.learn_calls += 1;
        self.sync_targets()?;

        Ok(LearnOutcome::Updated(LossReport {
            loss,
            actor_loss: Some(actor_loss),
        }))
    }

    fn exploration(&self) -> f32 {
        self.noise_scale
    }

    fn set_exploration(&mut self, value: f32) {
        self.noise_scale = value.max(0.0);
    }

    fn learn_calls(&self) -> usize {
        self.learn_calls
    }

    fn checkpoint(&self) -> Checkpoint {
        let mut checkpoint = Checkpoint {
            learn_calls: self.learn_calls,
            exploration: self.noise_scale,
            ..Checkpoint::default()
        };
        checkpoint.networks.insert("actor".to_string(), self.actor.parameters());
        checkpoint.networks.insert("actor_target".to_string(), self.actor_target.parameters());
        checkpoint.networks.insert("critic".to_string(), self.critic.parameters());
        checkpoint.networks.insert("critic_target".to_string(), self.critic_target.parameters());
        checkpoint
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let mut actor = self.actor.clone();
        let mut actor_target = self.actor_target.clone();
        let mut critic = self.critic.clone();
        let mut critic_target = self.critic_target.clone();
        actor.set_parameters(checkpoint.network("actor")?)?;
        actor_target.set_parameters(checkpoint.network("actor_target")?)?;
        critic.set_parameters(checkpoint.network("critic")?)?;
        critic_target.set_parameters(checkpoint.network("critic_target")?)?;

        self.actor = actor;
        self.actor_target = actor_target;
        self.critic = critic;
        self.critic_target = critic_target;
        self.learn_calls = checkpoint.learn_calls;
        self.set_exploration(checkpoint.exploration);
        Ok(())
    }
}

/// Concatenate states and actions column-wise
pub(super) fn critic_input<'a>(states: ArrayView2<'a, f32>, actions: ArrayView2<'a, f32>) -> Result<Array2<f32>> {
    concatenate(Axis(1), &[states, actions]).map_err(|e| {
        RlError::shape_mismatch(
            format!("{} state rows", states.nrows()),
            format!("{} action rows ({})", actions.nrows(), e),
        )
    })
}

/// Stack per-transition action vectors into a `(batch, action_dim)` matrix
pub(super) fn stack_actions(actions: &[Array1<f32>], action_dim: usize) -> Array2<f32> {
    let mut stacked = Array2::zeros((actions.len(), action_dim));
    for (mut row, action) in stacked.rows_mut().into_iter().zip(actions.iter()) {
        row.assign(action);
    }
    stacked
}

/// `r + gamma * next_value`, or `r` alone for terminal transitions
pub(super) fn bootstrap_targets(rewards: &Array1<f32>, dones: &Array1<f32>, next_values: &Array1<f32>, gamma: f32) -> Array1<f32> {
    Array1::from_iter(
        rewards
            .iter()
            .zip(dones.iter())
            .zip(next_values.iter())
            .map(|((&r, &done), &v)| if done > 0.5 { r } else { r + gamma * v }),
    )
}

pub(super) fn policy_action(
    actor: &Mlp,
    bounds: ActionBounds,
    observation: ArrayView1<f32>,
    observation_size: usize,
) -> Result<Array1<f32>> {
    check_observation(&observation, observation_size)?;
    let raw = actor.forward(observation.insert_axis(Axis(0)))?;
    let action = bounds.scale(&raw).row(0).to_owned();
    if action.iter().any(|a| !a.is_finite()) {
        return Err(RlError::NumericInstability("non-finite policy output".to_string()));
    }
    Ok(action)
}

/// Add Gaussian noise with std `noise_scale * half_range` and clamp to the bounds.
pub(super) fn add_exploration_noise<R: Rng + ?Sized>(
    mut action: Array1<f32>,
    noise_scale: f32,
    bounds: ActionBounds,
    rng: &mut R,
) -> Result<Array1<f32>> {
    if noise_scale <= 0.0 {
        return Ok(action);
    }
    let normal = Normal::new(0.0, noise_scale * bounds.half_range())
        .map_err(|e| RlError::NumericInstability(e.to_string()))?;
    for a in action.iter_mut() {
        let noise: f32 = normal.sample(rng);
        *a = (*a + noise).clamp(bounds.low, bounds.high);
    }
    Ok(action)
}

pub(super) fn random_action<R: Rng + ?Sized>(action_dim: usize, bounds: ActionBounds, rng: &mut R) -> Array1<f32> {
    Array1::from_iter((0..action_dim).map(|_| rng.gen_range(bounds.low..=bounds.high)))
}

pub(super) fn check_continuous_transition(
    transition: &Transition<Array1<f32>>,
    observation_size: usize,
    action_dim: usize,
) -> Result<()> {
    check_observation(&transition.state.view(), observation_size)?;
    check_observation(&transition.next_state.view(), observation_size)?;
    if transition.action.len() != action_dim {
        return Err(RlError::shape_mismatch(
            format!("action of length {}", action_dim),
            format!("action of length {}", transition.action.len()),
        ));
    }
    Ok(())
}

/// One regression step of `critic` toward `targets`.
///
/// Returns the loss and the per-sample TD errors `target - Q`.
pub(super) fn fit_critic(
    critic: &mut Mlp,
    loss_kind: LossKind,
    inputs: ArrayView2<f32>,
    targets: &Array1<f32>,
    weights: Option<ArrayView1<f32>>,
    learning_rate: f32,
) -> Result<(f32, Array1<f32>)> {
    let q = critic.forward_train(inputs)?.column(0).to_owned();

    let loss = loss_kind.compute(q.view(), targets.view(), weights);
    check_finite_loss(loss, "critic loss")?;

    let grad = loss_kind.gradient(q.view(), targets.view(), weights).insert_axis(Axis(1));
    let (gradients, _) = critic.backward(grad.view())?;
    critic.apply_gradients(gradients, learning_rate)?;
    Ok((loss, targets - &q))
}

/// Ascend `mean Q(s, pi(s))` through `critic` into `actor`.
///
/// Only the actor is updated; the critic just supplies dQ/da.
pub(super) fn ascend_policy(
    actor: &mut Mlp,
    critic: &mut Mlp,
    states: ArrayView2<f32>,
    bounds: ActionBounds,
    learning_rate: f32,
) -> Result<f32> {
    let observation_size = states.ncols();
    let batch_size = states.nrows() as f32;
    let raw = actor.forward_train(states)?;
    let policy_actions = bounds.scale(&raw);

    let inputs = critic_input(states.view(), policy_actions.view())?;
    let q = critic.forward_train(inputs.view())?;
    let actor_loss = -q.mean().unwrap_or(f32::NAN);
    check_finite_loss(actor_loss, "actor loss")?;

    // d(-mean Q)/dQ, then dQ/da from the critic's input gradient
    let q_grad = Array2::from_elem(q.raw_dim(), -1.0 / batch_size);
    let (_, input_grad) = critic.backward(q_grad.view())?;
    let action_grad = input_grad.slice(s![.., observation_size..]).to_owned() * bounds.half_range();

    let (gradients, _) = actor.backward(action_grad.view())?;
    actor.apply_gradients(gradients, learning_rate)?;
    Ok(actor_loss)
}

/// Builder pattern for DdpgAgent
#[derive(Clone, Debug)]
pub struct DdpgAgentBuilder {
    observation_size: usize,
    action_dim: usize,
    bounds: ActionBounds,
    hidden_sizes: Vec<usize>,
    optimizer: OptimizerWrapper,
    clipper: GradientClipper,
    actor_lr: f32,
    critic_lr: f32,
    gamma: f32,
    noise_scale: f32,
    batch_size: usize,
    replay_capacity: usize,
    priority: Option<PriorityConfig>,
    target_sync: TargetSync,
    loss: LossKind,
    seed: u64,
}

impl DdpgAgentBuilder {
    pub fn new(observation_size: usize, action_dim: usize) -> Self {
        DdpgAgentBuilder {
            observation_size,
            action_dim,
            bounds: ActionBounds { low: -1.0, high: 1.0 },
            hidden_sizes: vec![256, 256],
            optimizer: OptimizerWrapper::adam(),
            clipper: GradientClipper::None,
            actor_lr: 1e-4,
            critic_lr: 1e-3,
            gamma: 0.99,
            noise_scale: 0.1,
            batch_size: 64,
            replay_capacity: 100_000,
            priority: None,
            target_sync: TargetSync::Soft { tau: 0.005 },
            loss: LossKind::Mse,
            seed: 0,
        }
    }

    /// Size the agent from environment spaces.
    ///
    /// Requires a continuous action space.
    pub fn for_spaces(observation_space: &Space, action_space: &Space) -> Result<Self> {
        match action_space {
            Space::Continuous { dim, low, high } if *dim > 0 => {
                Ok(Self::new(observation_space.flat_dim(), *dim).action_bounds(*low, *high))
            }
            other => Err(RlError::shape_mismatch(
                "continuous action space".to_string(),
                format!("{:?}", other),
            )),
        }
    }

    pub fn action_bounds(mut self, low: f32, high: f32) -> Self {
        self.bounds = ActionBounds { low, high };
        self
    }

    pub fn hidden_sizes(mut self, sizes: &[usize]) -> Self {
        self.hidden_sizes = sizes.to_vec();
        self
    }

    pub fn optimizer(mut self, optimizer: OptimizerWrapper) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn gradient_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    pub fn actor_lr(mut self, lr: f32) -> Self {
        self.actor_lr = lr;
        self
    }

    pub fn critic_lr(mut self, lr: f32) -> Self {
        self.critic_lr = lr;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn noise_scale(mut self, scale: f32) -> Self {
        self.noise_scale = scale;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    pub fn prioritized(mut self, config: PriorityConfig) -> Self {
        self.priority = Some(config);
        self
    }

    pub fn target_sync(mut self, sync: TargetSync) -> Self {
        self.target_sync = sync;
        self
    }

    pub fn tau(mut self, tau: f32) -> Self {
        self.target_sync = TargetSync::Soft { tau };
        self
    }

    pub fn loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<DdpgAgent> {
        if self.observation_size == 0 || self.action_dim == 0 {
            return Err(RlError::invalid_parameter("size", "observation and action sizes must be greater than 0"));
        }
        self.bounds.validate()?;
        if !(self.gamma >= 0.0 && self.gamma < 1.0) {
            return Err(RlError::invalid_parameter("gamma", "must lie in [0, 1)"));
        }
        if !(self.actor_lr > 0.0 && self.critic_lr > 0.0) {
            return Err(RlError::invalid_parameter("learning_rate", "must be positive"));
        }
        if self.batch_size == 0 || self.batch_size > self.replay_capacity {
            return Err(RlError::invalid_parameter("batch_size", "must be in 1..=replay_capacity"));
        }
        self.target_sync.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut actor_sizes = vec![self.observation_size];
        actor_sizes.extend_from_slice(&self.hidden_sizes);
        actor_sizes.push(self.action_dim);
        let actor = Mlp::with_output_activation(&actor_sizes, Activation::Tanh, self.optimizer.clone(), &mut rng)?
            .with_clipper(self.clipper);

        let mut critic_sizes = vec![self.observation_size + self.action_dim];
        critic_sizes.extend_from_slice(&self.hidden_sizes);
        critic_sizes.push(1);
        let critic = Mlp::with_output_activation(&critic_sizes, Activation::Linear, self.optimizer, &mut rng)?
            .with_clipper(self.clipper);

        let memory = match self.priority {
            Some(config) => Memory::prioritized(self.replay_capacity, config)?,
            None => Memory::uniform(self.replay_capacity)?,
        };

        Ok(DdpgAgent {
            actor_target: actor.clone(),
            critic_target: critic.clone(),
            actor,
            critic,
            memory,
            observation_size: self.observation_size,
            action_dim: self.action_dim,
            bounds: self.bounds,
            noise_scale: self.noise_scale.max(0.0),
            gamma: self.gamma,
            actor_lr: self.actor_lr,
            critic_lr: self.critic_lr,
            batch_size: self.batch_size,
            target_sync: self.target_sync,
            loss: self.loss,
            learn_calls: 0,
            rng,
        })
    }
}
