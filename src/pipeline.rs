use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::auth::TokenManager;
use crate::cnpj_finder::CnpjLookup;
use crate::seller::{extract, SellerClient, SellerRecord};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not obtain a marketplace access token; check the credentials file and connectivity")]
    NoToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Profile fetch + extraction
    Profiles,
    /// CNPJ search
    Cnpj,
}

/// Sequential two-pass enrichment: profiles for every row, then CNPJ search.
pub struct Pipeline<L> {
    sellers: SellerClient,
    lookup: L,
}

impl<L: CnpjLookup> Pipeline<L> {
    pub fn new(sellers: SellerClient, lookup: L) -> Self {
        Self { sellers, lookup }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.sellers.tokens()
    }

    pub async fn run(&self, seller_ids: &[u64]) -> Result<Vec<SellerRecord>, PipelineError> {
        self.run_with_callback(seller_ids, |stage, record, completed, total| {
            info!(
                "  [{:?} {}/{}] {} | {} | {}",
                stage, completed, total, record.seller_id, record.nickname, record.cnpj_found
            );
        })
        .await
    }

    /// Like [`Pipeline::run`], reporting each finished row to `progress_callback`.
    ///
    /// Fails only when no initial token can be obtained; per-row failures end
    /// up as sentinel values in the records.
    pub async fn run_with_callback<F>(
        &self,
        seller_ids: &[u64],
        mut progress_callback: F,
    ) -> Result<Vec<SellerRecord>, PipelineError>
    where
        F: FnMut(Stage, &SellerRecord, usize, usize),
    {
        info!("Authenticating with the marketplace API...");
        let mut token = self
            .tokens()
            .get_valid_token()
            .await
            .ok_or(PipelineError::NoToken)?;

        let total = seller_ids.len();
        info!("Step 1/2: fetching {} seller profiles", total);

        let mut records = Vec::with_capacity(total);
        for (idx, &seller_id) in seller_ids.iter().enumerate() {
            let (payload, current) = self.sellers.fetch(seller_id, token).await;
            token = current;

            let record = extract(seller_id, &payload);
            progress_callback(Stage::Profiles, &record, idx + 1, total);
            records.push(record);
        }

        info!("Step 2/2: searching CNPJs");
        for (idx, record) in records.iter_mut().enumerate() {
            if record.is_searchable() {
                record.cnpj_found = self.lookup.find_cnpj(&record.nickname, &record.city).await;
            }
            progress_callback(Stage::Cnpj, record, idx + 1, total);
        }

        Ok(records)
    }
}
