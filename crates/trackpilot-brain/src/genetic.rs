//! Reference genetic optimizer: elitism, tournament selection, neuron crossover, gaussian mutation.

use rand::rngs::SmallRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use trackpilot_core::{
    EvaluatedGenome, GenerationControl, GenomeId, PopulationOptimizer, SimulationError,
    SteeringPolicy,
};

use crate::{Evolvable, MlpBrain};

/// Breeding parameters for [`GeneticPopulation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneticConfig {
    /// Hidden layer widths of every steering brain.
    pub hidden_layers: Vec<usize>,
    /// Top genomes copied unchanged into the next generation.
    pub elitism: usize,
    pub tournament_size: usize,
    pub crossover_rate: f32,
    /// Per-parameter mutation probability.
    pub mutation_rate: f32,
    /// Standard deviation of the gaussian perturbation.
    pub mutation_scale: f32,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![16],
            elitism: 2,
            tournament_size: 3,
            crossover_rate: 0.7,
            mutation_rate: 0.1,
            mutation_scale: 0.3,
        }
    }
}

impl GeneticConfig {
    pub fn validate(&self, population_size: usize) -> Result<(), SimulationError> {
        if self.hidden_layers.contains(&0) {
            return Err(SimulationError::InvalidConfig(
                "genetic.hidden_layers must not contain zero-width layers",
            ));
        }
        if self.tournament_size == 0 {
            return Err(SimulationError::InvalidConfig(
                "genetic.tournament_size must be non-zero",
            ));
        }
        if self.elitism > population_size {
            return Err(SimulationError::InvalidConfig(
                "genetic.elitism cannot exceed the population size",
            ));
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) || !(0.0..=1.0).contains(&self.mutation_rate)
        {
            return Err(SimulationError::InvalidConfig(
                "genetic crossover_rate and mutation_rate must lie in [0, 1]",
            ));
        }
        if self.mutation_scale < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "genetic.mutation_scale must be non-negative",
            ));
        }
        Ok(())
    }
}

/// A steering brain plus the bookkeeping the generation runner needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MlpGenome {
    id: GenomeId,
    brain: MlpBrain,
    fitness: Option<f32>,
}

impl MlpGenome {
    #[must_use]
    pub const fn new(id: GenomeId, brain: MlpBrain) -> Self {
        Self {
            id,
            brain,
            fitness: None,
        }
    }

    #[must_use]
    pub const fn brain(&self) -> &MlpBrain {
        &self.brain
    }

    #[must_use]
    pub fn into_brain(self) -> MlpBrain {
        self.brain
    }

    fn score(&self) -> f32 {
        self.fitness.unwrap_or(f32::NEG_INFINITY)
    }
}

impl EvaluatedGenome for MlpGenome {
    fn id(&self) -> GenomeId {
        self.id
    }

    fn policy_mut(&mut self) -> &mut dyn SteeringPolicy {
        &mut self.brain
    }

    fn set_fitness(&mut self, fitness: f32) {
        self.fitness = Some(fitness);
    }

    fn fitness(&self) -> Option<f32> {
        self.fitness
    }
}

/// Fixed-size population of [`MlpGenome`]s bred generation by generation.
#[derive(Debug, Clone)]
pub struct GeneticPopulation {
    config: GeneticConfig,
    genomes: Vec<MlpGenome>,
    best: Option<MlpGenome>,
    next_id: u64,
    rng: SmallRng,
}

impl GeneticPopulation {
    pub fn new(
        config: GeneticConfig,
        population_size: usize,
        observation_len: usize,
        mut rng: SmallRng,
    ) -> Result<Self, SimulationError> {
        if population_size == 0 {
            return Err(SimulationError::EmptyPopulation);
        }
        config.validate(population_size)?;
        let genomes = (0..population_size)
            .map(|idx| {
                MlpBrain::steering(observation_len, &config.hidden_layers, &mut rng)
                    .map(|brain| MlpGenome::new(GenomeId(idx as u64), brain))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            next_id: population_size as u64,
            genomes,
            best: None,
            rng,
        })
    }

    #[must_use]
    pub fn genomes(&self) -> &[MlpGenome] {
        &self.genomes
    }

    /// Best genome observed so far, with the fitness it was scored at.
    #[must_use]
    pub const fn best(&self) -> Option<&MlpGenome> {
        self.best.as_ref()
    }

    fn record_best(&mut self) {
        let Some(champion) = self
            .genomes
            .iter()
            .filter(|genome| genome.fitness.is_some())
            .max_by(|a, b| a.score().total_cmp(&b.score()))
        else {
            return;
        };
        if self
            .best
            .as_ref()
            .is_none_or(|best| champion.score() > best.score())
        {
            self.best = Some(champion.clone());
        }
    }

    fn tournament(&mut self, ranked: &[MlpGenome]) -> usize {
        let mut winner = self.rng.random_range(0..ranked.len());
        for _ in 1..self.config.tournament_size {
            let challenger = self.rng.random_range(0..ranked.len());
            // `ranked` is sorted best-first, so the lower index wins.
            winner = winner.min(challenger);
        }
        winner
    }

    fn fresh_id(&mut self) -> GenomeId {
        let id = GenomeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Replace the population with the next generation.
    fn breed(&mut self) {
        let mut ranked = std::mem::take(&mut self.genomes);
        ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));
        let population = ranked.len();

        let mut next = Vec::with_capacity(population);
        for elite in ranked.iter().take(self.config.elitism) {
            let mut survivor = elite.clone();
            survivor.fitness = None;
            next.push(survivor);
        }

        while next.len() < population {
            let first = self.tournament(&ranked);
            let second = self.tournament(&ranked);
            let rng: &mut dyn RngCore = &mut self.rng;
            let mut brain = if rng.random::<f32>() < self.config.crossover_rate {
                ranked[first]
                    .brain
                    .crossover(&ranked[second].brain, rng)
                    .unwrap_or_else(|| ranked[first].brain.clone())
            } else {
                ranked[first].brain.clone()
            };
            brain.mutate(rng, self.config.mutation_rate, self.config.mutation_scale);
            let id = self.fresh_id();
            next.push(MlpGenome::new(id, brain));
        }

        debug!(
            population,
            elites = self.config.elitism.min(population),
            top = ranked.first().map_or(f32::NAN, MlpGenome::score),
            "bred next generation",
        );
        self.genomes = next;
    }
}

impl PopulationOptimizer for GeneticPopulation {
    type Genome = MlpGenome;

    fn evolve<F>(
        &mut self,
        generations: u32,
        mut evaluate: F,
    ) -> Result<Option<Self::Genome>, SimulationError>
    where
        F: FnMut(&mut [Self::Genome]) -> Result<GenerationControl, SimulationError>,
    {
        for generation in 0..generations {
            let control = evaluate(&mut self.genomes)?;
            self.record_best();
            if control == GenerationControl::Stop || generation + 1 == generations {
                break;
            }
            self.breed();
        }
        Ok(self.best.clone())
    }
}
