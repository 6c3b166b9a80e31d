//! Pipeline sequencing fetch, persistence, scoring and ranking.
//!
//! Each stage only starts once its dependency stage is durably complete:
//! fetched batches are committed before the next batch starts, scoring
//! requires the full record set, ranking requires the full score set. A
//! failed or interrupted run leaves the store in its last committed state
//! and the next run resumes from the missing-token set.

use crate::collection_store::{CollectionStore, StoreError};
use crate::fetcher::{FetchError, MetadataFetcher, MetadataSource};
use crate::rank::{rank_all, rank_for_token, TokenRank};
use crate::scoring::{score_token, ScoringError, TraitFrequencies};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Scoring was requested before every token's record was stored.
    #[error("scoring requires the full collection, have {have} of {need} records")]
    IncompleteMetadata { have: usize, need: usize },

    /// Ranking was requested before every token was scored.
    #[error("ranking requires the full collection to be scored, have {have} of {need} scores")]
    IncompleteScores { have: usize, need: usize },

    #[error("token {0} is not part of the collection")]
    UnknownToken(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub collection_size: u32,
    pub batch_size: usize,
}

pub struct RarityPipeline<S: CollectionStore, M: MetadataSource> {
    store: S,
    fetcher: MetadataFetcher<M>,
    settings: PipelineSettings,
}

impl<S: CollectionStore, M: MetadataSource> RarityPipeline<S, M> {
    pub fn new(store: S, fetcher: MetadataFetcher<M>, settings: PipelineSettings) -> Self {
        Self {
            store,
            fetcher,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn collection_size(&self) -> usize {
        self.settings.collection_size as usize
    }

    /// Fetch and persist records for every token that has none yet, one
    /// batch at a time. Already-stored tokens are never fetched again.
    pub async fn populate_metadata(&self, refresh: bool) -> Result<(), PipelineError> {
        if refresh {
            info!("Refreshing collection records");
            self.store.reset_metadata()?;
        }

        let have = self.store.metadata_count()?;
        let need = self.collection_size();
        if have < need {
            info!("Fetching metadata for {} of {} tokens", need - have, need);
            let missing = self.store.missing_tokens(self.settings.collection_size)?;

            for batch in missing.chunks(self.settings.batch_size) {
                let records = self.fetcher.fetch_batch(batch).await?;
                self.store.insert_metadata_batch(&records)?;
                debug!("Committed a batch of {} records", records.len());
            }
        }

        info!(
            "Collection records stored for {} tokens",
            self.store.metadata_count()?
        );
        Ok(())
    }

    /// Score every unscored record against frequencies tallied from the
    /// complete record set, one batch at a time.
    pub fn populate_scores(&self, refresh: bool) -> Result<(), PipelineError> {
        if refresh {
            info!("Refreshing collection scores");
            self.store.reset_scores()?;
        }

        let need = self.collection_size();
        if self.store.score_count()? < need {
            let have = self.store.metadata_count()?;
            if have < need {
                return Err(PipelineError::IncompleteMetadata { have, need });
            }

            let records = self.store.all_metadata()?;
            let frequencies = TraitFrequencies::tally(&records);

            let unscored = self.store.unscored_metadata()?;
            info!("Scoring {} tokens", unscored.len());
            for batch in unscored.chunks(self.settings.batch_size) {
                let scores = batch
                    .iter()
                    .map(|record| score_token(record, &frequencies, self.settings.collection_size))
                    .collect::<Result<Vec<_>, _>>()?;
                self.store.insert_score_batch(&scores)?;
                debug!("Committed a batch of {} scores", scores.len());
            }
        }

        info!("Scores stored for {} tokens", self.store.score_count()?);
        Ok(())
    }

    fn confirm_scores_complete(&self) -> Result<(), PipelineError> {
        let have = self.store.score_count()?;
        let need = self.collection_size();
        if have < need {
            return Err(PipelineError::IncompleteScores { have, need });
        }
        Ok(())
    }

    /// Rank view of the whole collection, ordered by descending rarity.
    pub fn rarity_ranks(&self) -> Result<Vec<TokenRank>, PipelineError> {
        self.confirm_scores_complete()?;
        Ok(rank_all(&self.store.all_scores()?))
    }

    /// Rank view of a single token, consistent with [`Self::rarity_ranks`].
    pub fn rank_for_token(&self, token: u32) -> Result<TokenRank, PipelineError> {
        self.confirm_scores_complete()?;
        let scores = self.store.all_scores()?;
        rank_for_token(&scores, token).ok_or(PipelineError::UnknownToken(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection_store::SqliteCollectionStore;
    use crate::fetcher::{TokenDocument, TraitAttribute};
    use async_trait::async_trait;

    struct StaticSource;

    #[async_trait]
    impl MetadataSource for StaticSource {
        async fn fetch(&self, token: u32) -> Result<TokenDocument, FetchError> {
            let head = if token == 0 { "Halo" } else { "Beanie" };
            Ok(TokenDocument {
                attributes: [
                    ("background", "Blue"),
                    ("skin", "Normal"),
                    ("body", "Hoodie"),
                    ("face", "Winking"),
                    ("head", head),
                ]
                .iter()
                .map(|(trait_type, value)| TraitAttribute {
                    trait_type: trait_type.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            })
        }
    }

    fn test_pipeline(
        collection_size: u32,
    ) -> RarityPipeline<SqliteCollectionStore, StaticSource> {
        RarityPipeline::new(
            SqliteCollectionStore::open_in_memory().unwrap(),
            MetadataFetcher::new(StaticSource, 4),
            PipelineSettings {
                collection_size,
                batch_size: 3,
            },
        )
    }

    #[tokio::test]
    async fn scoring_before_fetching_completes_is_rejected() {
        let pipeline = test_pipeline(8);

        let err = pipeline.populate_scores(false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteMetadata { have: 0, need: 8 }
        ));

        // Nothing was persisted by the failed invocation.
        assert_eq!(pipeline.store().score_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn ranking_before_scoring_completes_is_rejected() {
        let pipeline = test_pipeline(4);
        pipeline.populate_metadata(false).await.unwrap();

        let err = pipeline.rarity_ranks().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteScores { have: 0, need: 4 }
        ));
    }

    #[tokio::test]
    async fn full_run_ranks_the_rare_token_first() {
        let pipeline = test_pipeline(4);
        pipeline.populate_metadata(false).await.unwrap();
        pipeline.populate_scores(false).unwrap();

        let ranks = pipeline.rarity_ranks().unwrap();
        assert_eq!(ranks.len(), 4);
        assert_eq!(ranks[0].token, 0);
        assert_eq!(ranks[0].rank, 1);

        let single = pipeline.rank_for_token(0).unwrap();
        assert_eq!(single, ranks[0]);
    }

    #[tokio::test]
    async fn unknown_token_lookup_is_rejected() {
        let pipeline = test_pipeline(2);
        pipeline.populate_metadata(false).await.unwrap();
        pipeline.populate_scores(false).unwrap();

        let err = pipeline.rank_for_token(9).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownToken(9)));
    }
}
