use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::env::Space;
use crate::error::{Result, RlError};
use crate::loss::{Loss, LossKind};
use crate::network::{Architecture, Network, QNetwork};
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use crate::replay_buffer::{Memory, PriorityConfig, Transition};
use super::{check_finite_loss, check_observation, Agent, LearnOutcome, LossReport, TargetSync};

/// Deep Q-Network agent with a target network and optional Double DQN targets.
///
/// The live network picks actions and is trained on
/// `r + gamma * (1 - done) * max_a' Q_target(s', a')`; with Double DQN the
/// maximizing action comes from the live network and its value from the
/// target network. Only the Q-value of the taken action receives gradient.
///
/// # Example
///
/// ```rust
/// use cares_rl::agent::{Agent, DqnAgentBuilder, TargetSync};
/// use cares_rl::network::Architecture;
/// use ndarray::array;
///
/// let mut agent = DqnAgentBuilder::new(4, 2)
///     .architecture(Architecture::Dueling)
///     .hidden_sizes(&[32, 32])
///     .target_sync(TargetSync::Hard { period: 100 })
///     .seed(42)
///     .build()
///     .unwrap();
///
/// let greedy = agent.select_action(array![0.1, -0.2, 0.3, -0.1].view(), false).unwrap();
/// assert!(greedy < 2);
/// ```
#[derive(Clone, Debug)]
pub struct DqnAgent {
    q_network: QNetwork,
    target_network: QNetwork,
    memory: Memory<usize>,
    observation_size: usize,
    num_actions: usize,
    epsilon: f32,
    gamma: f32,
    learning_rate: f32,
    batch_size: usize,
    target_sync: TargetSync,
    loss: LossKind,
    use_double_dqn: bool,
    learn_calls: usize,
    rng: StdRng,
}

impl DqnAgent {
    /// Q-values of the live network for one observation
    pub fn q_values(&self, observation: ArrayView1<f32>) -> Result<Array1<f32>> {
        check_observation(&observation, self.observation_size)?;
        self.q_network.forward_one(observation)
    }

    pub fn q_network(&self) -> &QNetwork {
        &self.q_network
    }

    pub fn target_network(&self) -> &QNetwork {
        &self.target_network
    }

    pub fn memory(&self) -> &Memory<usize> {
        &self.memory
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// `target <- live` immediately, regardless of the sync policy
    pub fn update_target_network(&mut self) -> Result<()> {
        self.target_network.hard_update_from(&self.q_network)
    }

    /// Bootstrapped TD targets for the batch
    fn td_targets(&self, rewards: &Array1<f32>, next_states: &Array2<f32>, dones: &Array1<f32>) -> Result<Array1<f32>> {
        let next_target = self.target_network.forward(next_states.view())?;
        let next_values: Array1<f32> = if self.use_double_dqn {
            let next_live = self.q_network.forward(next_states.view())?;
            Array1::from_iter(
                next_live
                    .rows()
                    .into_iter()
                    .zip(next_target.rows())
                    .map(|(live, target)| target[argmax(live)]),
            )
        } else {
            Array1::from_iter(
                next_target
                    .rows()
                    .into_iter()
                    .map(|row| row.iter().fold(f32::NEG_INFINITY, |max, &v| max.max(v))),
            )
        };

        // Terminal targets are the reward alone
        Ok(Array1::from_iter(
            rewards
                .iter()
                .zip(dones.iter())
                .zip(next_values.iter())
                .map(|((&r, &done), &v)| if done > 0.5 { r } else { r + self.gamma * v }),
        ))
    }

    fn sync_targets(&mut self) -> Result<()> {
        if !self.target_sync.is_due(self.learn_calls) {
            return Ok(());
        }
        match self.target_sync {
            TargetSync::Hard { .. } => {
                debug!(learn_calls = self.learn_calls, "hard target sync");
                self.target_network.hard_update_from(&self.q_network)
            }
            TargetSync::Soft { tau } => self.target_network.soft_update_from(&self.q_network, tau),
        }
    }
}

impl Agent for DqnAgent {
    type Action = usize;

    fn select_action(&mut self, observation: ArrayView1<f32>, explore: bool) -> Result<usize> {
        check_observation(&observation, self.observation_size)?;
        if explore && self.rng.gen::<f32>() < self.epsilon {
            return Ok(self.rng.gen_range(0..self.num_actions));
        }
        let q_values = self.q_network.forward_one(observation)?;
        if q_values.iter().any(|q| !q.is_finite()) {
            return Err(RlError::NumericInstability("non-finite Q-values".to_string()));
        }
        Ok(argmax(q_values.view()))
    }

    fn random_action(&mut self) -> usize {
        self.rng.gen_range(0..self.num_actions)
    }

    fn observe(&mut self, transition: Transition<usize>) -> Result<()> {
        check_observation(&transition.state.view(), self.observation_size)?;
        check_observation(&transition.next_state.view(), self.observation_size)?;
        if transition.action >= self.num_actions {
            return Err(RlError::InvalidAction {
                action: transition.action,
                num_actions: self.num_actions,
            });
        }
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

        let targets = self.td_targets(&batch.rewards, &batch.next_states, &batch.dones)?;

        let q_values = self.q_network.forward_train(batch.states.view())?;
        let predictions = Array1::from_iter(
            batch.actions.iter().enumerate().map(|(i, &a)| q_values[[i, a]]),
        );

        let weights = batch.weights.as_ref().map(|w| w.view());
        let loss = self.loss.compute(predictions.view(), targets.view(), weights);
        check_finite_loss(loss, "Q loss")?;

        let sample_grads = self.loss.gradient(predictions.view(), targets.view(), weights);
        let mut output_grad = Array2::zeros(q_values.raw_dim());
        for (i, &a) in batch.actions.iter().enumerate() {
            output_grad[[i, a]] = sample_grads[i];
        }

        let (gradients, _) = self.q_network.backward(output_grad.view())?;
        self.q_network.apply_gradients(gradients, self.learning_rate)?;

        let td_errors: Vec<f32> = targets.iter().zip(predictions.iter()).map(|(t, p)| t - p).collect();
        self.memory.update_priorities(&batch.indices, &td_errors)?;

        self.learn_calls += 1;
        self.sync_targets()?;

        Ok(LearnOutcome::Updated(LossReport { loss, actor_loss: None }))
    }

    fn exploration(&self) -> f32 {
        self.epsilon
    }

    fn set_exploration(&mut self, value: f32) {
        self.epsilon = value.max(0.0).min(1.0);
    }

    fn learn_calls(&self) -> usize {
        self.learn_calls
    }

    fn checkpoint(&self) -> Checkpoint {
        let mut checkpoint = Checkpoint {
            learn_calls: self.learn_calls,
            exploration: self.epsilon,
            ..Checkpoint::default()
        };
        checkpoint.networks.insert("q_network".to_string(), self.q_network.parameters());
        checkpoint.networks.insert("target_network".to_string(), self.target_network.parameters());
        checkpoint
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let live = checkpoint.network("q_network")?;
        let target = checkpoint.network("target_network")?;

        // Stage on copies so a bad snapshot leaves the agent untouched
        let mut q_network = self.q_network.clone();
        let mut target_network = self.target_network.clone();
        q_network.set_parameters(live)?;
        target_network.set_parameters(target)?;

        self.q_network = q_network;
        self.target_network = target_network;
        self.learn_calls = checkpoint.learn_calls;
        self.set_exploration(checkpoint.exploration);
        Ok(())
    }
}

/// Index of the largest value, first one on ties
fn argmax(values: ArrayView1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value { (i, v) } else { (best, best_value) }
        })
        .0
}

/// Builder pattern for DqnAgent
#[derive(Clone, Debug)]
pub struct DqnAgentBuilder {
    observation_size: usize,
    num_actions: usize,
    hidden_sizes: Vec<usize>,
    architecture: Architecture,
    optimizer: OptimizerWrapper,
    clipper: GradientClipper,
    learning_rate: f32,
    gamma: f32,
    epsilon: f32,
    batch_size: usize,
    replay_capacity: usize,
    priority: Option<PriorityConfig>,
    target_sync: TargetSync,
    loss: LossKind,
    use_double_dqn: bool,
    seed: u64,
}

impl DqnAgentBuilder {
    pub fn new(observation_size: usize, num_actions: usize) -> Self {
        DqnAgentBuilder {
            observation_size,
            num_actions,
            hidden_sizes: vec![64, 64],
            architecture: Architecture::Plain,
            optimizer: OptimizerWrapper::adam(),
            clipper: GradientClipper::None,
            learning_rate: 1e-3,
            gamma: 0.99,
            epsilon: 1.0,
            batch_size: 32,
            replay_capacity: 10_000,
            priority: None,
            target_sync: TargetSync::Hard { period: 100 },
            loss: LossKind::Mse,
            use_double_dqn: false,
            seed: 0,
        }
    }

    /// Size the agent from environment spaces.
    ///
    /// Requires a one-dimensional continuous observation space and a discrete action space.
    pub fn for_spaces(observation_space: &Space, action_space: &Space) -> Result<Self> {
        let observation_size = observation_space.flat_dim();
        match action_space {
            Space::Discrete { n } if *n > 0 => Ok(Self::new(observation_size, *n)),
            other => Err(RlError::shape_mismatch(
                "discrete action space".to_string(),
                format!("{:?}", other),
            )),
        }
    }

    pub fn hidden_sizes(mut self, sizes: &[usize]) -> Self {
        self.hidden_sizes = sizes.to_vec();
        self
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
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

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
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

    /// Use prioritized replay instead of uniform sampling
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

    pub fn use_double_dqn(mut self, use_double: bool) -> Self {
        self.use_double_dqn = use_double;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<DqnAgent> {
        if self.observation_size == 0 || self.num_actions == 0 {
            return Err(RlError::invalid_parameter("size", "observation and action sizes must be greater than 0"));
        }
        if !(self.gamma >= 0.0 && self.gamma < 1.0) {
            return Err(RlError::invalid_parameter("gamma", "must lie in [0, 1)"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(RlError::invalid_parameter("learning_rate", "must be positive"));
        }
        if self.batch_size == 0 || self.batch_size > self.replay_capacity {
            return Err(RlError::invalid_parameter("batch_size", "must be in 1..=replay_capacity"));
        }
        self.target_sync.validate()?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let q_network = QNetwork::build(
            self.architecture,
            self.observation_size,
            &self.hidden_sizes,
            self.num_actions,
            self.optimizer,
            self.clipper,
            &mut rng,
        )?;
        let target_network = q_network.clone();

        let memory = match self.priority {
            Some(config) => Memory::prioritized(self.replay_capacity, config)?,
            None => Memory::uniform(self.replay_capacity)?,
        };

        Ok(DqnAgent {
            q_network,
            target_network,
            memory,
            observation_size: self.observation_size,
            num_actions: self.num_actions,
            epsilon: self.epsilon.max(0.0).min(1.0),
            gamma: self.gamma,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            target_sync: self.target_sync,
            loss: self.loss,
            use_double_dqn: self.use_double_dqn,
            learn_calls: 0,
            rng,
        })
    }
}
