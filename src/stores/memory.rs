use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::embedding::cosine_of_unit;
use crate::store::{
    SampleMetadata, ScoredSample, SpeakerFilter, StoredSample, VectorStore, rank,
};
use crate::{Error, Result};

/// In-process [`VectorStore`] using brute-force cosine similarity.
///
/// Intended for tests and small single-process deployments. Writes take the write lock, so a
/// query never observes a half-applied upsert.
pub struct MemoryStore {
    dimension: usize,
    points: RwLock<HashMap<String, (Vec<f32>, SampleMetadata)>>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, (Vec<f32>, SampleMetadata)>>> {
        self.points
            .read()
            .map_err(|_| Error::msg("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, (Vec<f32>, SampleMetadata)>>> {
        self.points
            .write()
            .map_err(|_| Error::msg("memory store lock poisoned"))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::rejected(format!(
                "dimension mismatch: got {}, want {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

impl VectorStore for MemoryStore {
    fn upsert(&self, id: &str, vector: &[f32], metadata: &SampleMetadata) -> Result<()> {
        self.check_dimension(vector)?;
        self.write()?
            .insert(id.to_owned(), (vector.to_vec(), metadata.clone()));
        Ok(())
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<SpeakerFilter<'_>>,
    ) -> Result<Vec<ScoredSample>> {
        self.check_dimension(vector)?;
        if top_k == 0 {
            return Ok(vec![]);
        }

        let points = self.read()?;
        let mut results: Vec<ScoredSample> = points
            .iter()
            .filter(|(_, (_, meta))| filter.is_none_or(|f| f.matches(meta)))
            .map(|(id, (stored, meta))| ScoredSample {
                sample_id: id.clone(),
                score: cosine_of_unit(vector, stored),
                metadata: meta.clone(),
            })
            .collect();

        results.sort_by(rank);
        results.truncate(top_k);
        Ok(results)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.write()?.remove(id);
        Ok(())
    }

    fn delete_speaker(&self, speaker_id: &str) -> Result<()> {
        self.write()?
            .retain(|_, (_, meta)| meta.speaker_id != speaker_id);
        Ok(())
    }

    fn samples(
        &self,
        filter: Option<SpeakerFilter<'_>>,
        limit: usize,
    ) -> Result<Vec<StoredSample>> {
        let points = self.read()?;
        let mut samples: Vec<StoredSample> = points
            .iter()
            .filter(|(_, (_, meta))| filter.is_none_or(|f| f.matches(meta)))
            .map(|(id, (_, meta))| StoredSample {
                sample_id: id.clone(),
                metadata: meta.clone(),
            })
            .collect();

        // HashMap order is arbitrary; list in a stable order.
        samples.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));
        samples.truncate(limit);
        Ok(samples)
    }

    fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
