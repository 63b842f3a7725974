use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::activations::Activation;
use crate::checkpoint::Checkpoint;
use crate::env::Space;
use crate::error::{Result, RlError};
use crate::loss::LossKind;
use crate::network::{Mlp, Network};
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use crate::replay_buffer::{Memory, PriorityConfig, Transition};
use super::ddpg::{
    add_exploration_noise, ascend_policy, bootstrap_targets, check_continuous_transition, critic_input,
    fit_critic, policy_action, random_action, stack_actions, ActionBounds,
};
use super::{Agent, LearnOutcome, LossReport, TargetSync};

/// Twin Delayed Deep Deterministic Policy Gradient agent.
///
/// Extends DDPG with:
/// - twin critics, with targets from the smaller of the two target critics
/// - target policy smoothing: clipped Gaussian noise on the target action
/// - delayed updates: the actor and all target networks move once every
///   `policy_delay` learn calls
#[derive(Clone, Debug)]
pub struct Td3Agent {
    actor: Mlp,
    actor_target: Mlp,
    critic_one: Mlp,
    critic_two: Mlp,
    critic_one_target: Mlp,
    critic_two_target: Mlp,
    memory: Memory<Array1<f32>>,
    observation_size: usize,
    action_dim: usize,
    bounds: ActionBounds,
    /// Exploration noise std as a fraction of half the action range
    noise_scale: f32,
    /// Smoothing noise std on the tanh scale
    policy_noise: f32,
    noise_clip: f32,
    policy_delay: usize,
    gamma: f32,
    actor_lr: f32,
    critic_lr: f32,
    batch_size: usize,
    target_sync: TargetSync,
    loss: LossKind,
    learn_calls: usize,
    policy_updates: usize,
    rng: StdRng,
}

impl Td3Agent {
    pub fn actor(&self) -> &Mlp {
        &self.actor
    }

    pub fn actor_target(&self) -> &Mlp {
        &self.actor_target
    }

    pub fn critics(&self) -> (&Mlp, &Mlp) {
        (&self.critic_one, &self.critic_two)
    }

    pub fn critic_targets(&self) -> (&Mlp, &Mlp) {
        (&self.critic_one_target, &self.critic_two_target)
    }

    pub fn memory(&self) -> &Memory<Array1<f32>> {
        &self.memory
    }

    pub fn action_bounds(&self) -> (f32, f32) {
        (self.bounds.low, self.bounds.high)
    }

    /// Actor updates performed so far
    pub fn policy_updates(&self) -> usize {
        self.policy_updates
    }

    /// Deterministic policy action for one observation
    pub fn policy_action(&self, observation: ArrayView1<f32>) -> Result<Array1<f32>> {
        policy_action(&self.actor, self.bounds, observation, self.observation_size)
    }

    /// Target actions with clipped smoothing noise, in action-space units
    fn smoothed_target_actions(&mut self, next_states: &Array2<f32>) -> Result<Array2<f32>> {
        let mut raw = self.actor_target.forward(next_states.view())?;
        if self.policy_noise > 0.0 {
            let normal = Normal::new(0.0, self.policy_noise)
                .map_err(|e| RlError::NumericInstability(e.to_string()))?;
            let clip = self.noise_clip;
            for a in raw.iter_mut() {
                let noise: f32 = normal.sample(&mut self.rng);
                *a = (*a + noise.clamp(-clip, clip)).clamp(-1.0, 1.0);
            }
        }
        Ok(self.bounds.scale(&raw))
    }

    fn sync_targets(&mut self) -> Result<()> {
        if !self.target_sync.is_due(self.policy_updates) {
            return Ok(());
        }
        match self.target_sync {
            TargetSync::Hard { .. } => {
                debug!(policy_updates = self.policy_updates, "hard target sync");
                self.actor_target.hard_update_from(&self.actor)?;
                self.critic_one_target.hard_update_from(&self.critic_one)?;
                self.critic_two_target.hard_update_from(&self.critic_two)
            }
            TargetSync::Soft { tau } => {
                self.actor_target.soft_update_from(&self.actor, tau)?;
                self.critic_one_target.soft_update_from(&self.critic_one, tau)?;
                self.critic_two_target.soft_update_from(&self.critic_two, tau)
            }
        }
    }
}

impl Agent for Td3Agent {
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

        // Clipped double-Q target
        let next_actions = self.smoothed_target_actions(&batch.next_states)?;
        let next_inputs = critic_input(batch.next_states.view(), next_actions.view())?;
        let next_one = self.critic_one_target.forward(next_inputs.view())?;
        let next_two = self.critic_two_target.forward(next_inputs.view())?;
        let next_q = Array1::from_iter(
            next_one
                .column(0)
                .iter()
                .zip(next_two.column(0).iter())
                .map(|(&a, &b)| a.min(b)),
        );
        let targets = bootstrap_targets(&batch.rewards, &batch.dones, &next_q, self.gamma);

        // Stage every update on copies so a failure leaves all networks untouched
        let mut critic_one = self.critic_one.clone();
        let mut critic_two = self.critic_two.clone();
        let weights = batch.weights.as_ref().map(|w| w.view());
        let inputs = critic_input(batch.states.view(), actions.view())?;
        let (loss_one, td_one) = fit_critic(&mut critic_one, self.loss, inputs.view(), &targets, weights, self.critic_lr)?;
        let (loss_two, td_two) = fit_critic(&mut critic_two, self.loss, inputs.view(), &targets, weights, self.critic_lr)?;

        let update_policy = (self.learn_calls + 1) % self.policy_delay == 0;
        let mut actor = None;
        let mut actor_loss = None;
        if update_policy {
            let mut staged = self.actor.clone();
            let loss = ascend_policy(&mut staged, &mut critic_one, batch.states.view(), self.bounds, self.actor_lr)?;
            actor = Some(staged);
            actor_loss = Some(loss);
        }

        // Priority follows the larger of the two TD errors
        let td_errors: Vec<f32> = td_one
            .iter()
            .zip(td_two.iter())
            .map(|(&a, &b)| if a.abs() >= b.abs() { a } else { b })
            .collect();
        self.memory.update_priorities(&batch.indices, &td_errors)?;

        self.critic_one = critic_one;
        self.critic_two = critic_two;
        self.learn_calls += 1;
        if let Some(actor) = actor {
            self.actor = actor;
            self.policy_updates += 1;
            self.sync_targets()?;
        }

        Ok(LearnOutcome::Updated(LossReport {
            loss: loss_one + loss_two,
            actor_loss,
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
        let networks = [
            ("actor", &self.actor),
            ("actor_target", &self.actor_target),
            ("critic_one", &self.critic_one),
            ("critic_two", &self.critic_two),
            ("critic_one_target", &self.critic_one_target),
            ("critic_two_target", &self.critic_two_target),
        ];
        for (name, network) in networks {
            checkpoint.networks.insert(name.to_string(), network.parameters());
        }
        checkpoint
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let mut actor = self.actor.clone();
        let mut actor_target = self.actor_target.clone();
        let mut critic_one = self.critic_one.clone();
        let mut critic_two = self.critic_two.clone();
        let mut critic_one_target = self.critic_one_target.clone();
        let mut critic_two_target = self.critic_two_target.clone();
        actor.set_parameters(checkpoint.network("actor")?)?;
        actor_target.set_parameters(checkpoint.network("actor_target")?)?;
        critic_one.set_parameters(checkpoint.network("critic_one")?)?;
        critic_two.set_parameters(checkpoint.network("critic_two")?)?;
        critic_one_target.set_parameters(checkpoint.network("critic_one_target")?)?;
        critic_two_target.set_parameters(checkpoint.network("critic_two_target")?)?;

        self.actor = actor;
        self.actor_target = actor_target;
        self.critic_one = critic_one;
        self.critic_two = critic_two;
        self.critic_one_target = critic_one_target;
        self.critic_two_target = critic_two_target;
        self.learn_calls = checkpoint.learn_calls;
        self.policy_updates = checkpoint.learn_calls / self.policy_delay;
        self.set_exploration(checkpoint.exploration);
        Ok(())
    }
}

/// Builder pattern for Td3Agent
#[derive(Clone, Debug)]
pub struct Td3AgentBuilder {
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
    policy_noise: f32,
    noise_clip: f32,
    policy_delay: usize,
    batch_size: usize,
    replay_capacity: usize,
    priority: Option<PriorityConfig>,
    target_sync: TargetSync,
    loss: LossKind,
    seed: u64,
}

impl Td3AgentBuilder {
    pub fn new(observation_size: usize, action_dim: usize) -> Self {
        Td3AgentBuilder {
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
            policy_noise: 0.2,
            noise_clip: 0.5,
            policy_delay: 2,
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

    /// Smoothing noise std and clip range on the tanh scale
    pub fn target_noise(mut self, policy_noise: f32, noise_clip: f32) -> Self {
        self.policy_noise = policy_noise;
        self.noise_clip = noise_clip;
        self
    }

    pub fn policy_delay(mut self, delay: usize) -> Self {
        self.policy_delay = delay;
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

    pub fn loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<Td3Agent> {
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
        if self.policy_delay == 0 {
            return Err(RlError::invalid_parameter("policy_delay", "must be greater than 0"));
        }
        if !(self.policy_noise >= 0.0 && self.noise_clip >= 0.0) {
            return Err(RlError::invalid_parameter("target_noise", "noise and clip must be non-negative"));
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
        let critic_one = Mlp::with_output_activation(&critic_sizes, Activation::Linear, self.optimizer.clone(), &mut rng)?
            .with_clipper(self.clipper);
        let critic_two = Mlp::with_output_activation(&critic_sizes, Activation::Linear, self.optimizer, &mut rng)?
            .with_clipper(self.clipper);

        let memory = match self.priority {
            Some(config) => Memory::prioritized(self.replay_capacity, config)?,
            None => Memory::uniform(self.replay_capacity)?,
        };

        Ok(Td3Agent {
            actor_target: actor.clone(),
            critic_one_target: critic_one.clone(),
            critic_two_target: critic_two.clone(),
            actor,
            critic_one,
            critic_two,
            memory,
            observation_size: self.observation_size,
            action_dim: self.action_dim,
            bounds: self.bounds,
            noise_scale: self.noise_scale.max(0.0),
            policy_noise: self.policy_noise,
            noise_clip: self.noise_clip,
            policy_delay: self.policy_delay,
            gamma: self.gamma,
            actor_lr: self.actor_lr,
            critic_lr: self.critic_lr,
            batch_size: self.batch_size,
            target_sync: self.target_sync,
            loss: self.loss,
            learn_calls: 0,
            policy_updates: 0,
            rng,
        })
    }
}
