//! Postgres store implementation.
//!
//! Hashes and addresses are stored as 0x-prefixed lowercase hex TEXT; value
//! columns are decimal TEXT so no numeric type caps a uint256.

use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{IndexerError, Result};
use crate::store::Store;
use crate::types::{Bid, Chain, EventRecord, InscriptionRecord, Listing, MintJob, MintStatus};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Transient(format!("failed to connect to database: {e}")))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| IndexerError::Permanent(format!("failed to run migrations: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Transient(format!("store error: {e}"))
}

fn hex32(value: &B256) -> String {
    format!("0x{}", hex::encode(value.as_slice()))
}

fn hex_addr(value: &Address) -> String {
    format!("0x{}", hex::encode(value.as_slice()))
}

fn parse32(text: &str) -> Result<B256> {
    B256::from_str(text).map_err(|e| IndexerError::Permanent(format!("corrupt hash column: {e}")))
}

fn parse_addr(text: &str) -> Result<Address> {
    Address::from_str(text)
        .map_err(|e| IndexerError::Permanent(format!("corrupt address column: {e}")))
}

fn parse_u256(text: &str) -> Result<U256> {
    U256::from_str(text).map_err(|e| IndexerError::Permanent(format!("corrupt value column: {e}")))
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_inscription(&self, hash_id: B256) -> Result<Option<InscriptionRecord>> {
        let row = sqlx::query(
            r#"SELECT hash_id, sha, creator, owner, prev_owner, locked
               FROM inscriptions WHERE hash_id = $1"#,
        )
        .bind(hex32(&hash_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            let prev_owner: Option<String> = row.get("prev_owner");
            Ok(InscriptionRecord {
                hash_id: parse32(row.get("hash_id"))?,
                sha: parse32(row.get("sha"))?,
                creator: parse_addr(row.get("creator"))?,
                owner: parse_addr(row.get("owner"))?,
                prev_owner: prev_owner.as_deref().map(parse_addr).transpose()?,
                locked: row.get("locked"),
            })
        })
        .transpose()
    }

    async fn upsert_inscription(&self, record: &InscriptionRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO inscriptions (hash_id, sha, creator, owner, prev_owner, locked)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (hash_id) DO UPDATE SET
                   sha = EXCLUDED.sha,
                   owner = EXCLUDED.owner,
                   prev_owner = EXCLUDED.prev_owner,
                   locked = EXCLUDED.locked,
                   updated_at = NOW()"#,
        )
        .bind(hex32(&record.hash_id))
        .bind(hex32(&record.sha))
        .bind(hex_addr(&record.creator))
        .bind(hex_addr(&record.owner))
        .bind(record.prev_owner.as_ref().map(hex_addr))
        .bind(record.locked)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_owner(&self, hash_id: B256, owner: Address, prev_owner: Address) -> Result<()> {
        sqlx::query(
            r#"UPDATE inscriptions SET owner = $2, prev_owner = $3, updated_at = NOW()
               WHERE hash_id = $1"#,
        )
        .bind(hex32(&hash_id))
        .bind(hex_addr(&owner))
        .bind(hex_addr(&prev_owner))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_locked(&self, hash_id: B256, locked: bool) -> Result<()> {
        sqlx::query(r#"UPDATE inscriptions SET locked = $2, updated_at = NOW() WHERE hash_id = $1"#)
            .bind(hex32(&hash_id))
            .bind(locked)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_listing(&self, hash_id: B256) -> Result<Option<Listing>> {
        let row = sqlx::query(
            r#"SELECT hash_id, seller, min_value, to_address, tx_hash
               FROM listings WHERE hash_id = $1"#,
        )
        .bind(hex32(&hash_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            let to_address: Option<String> = row.get("to_address");
            Ok(Listing {
                hash_id: parse32(row.get("hash_id"))?,
                seller: parse_addr(row.get("seller"))?,
                min_value: parse_u256(row.get("min_value"))?,
                to_address: to_address.as_deref().map(parse_addr).transpose()?,
                tx_hash: parse32(row.get("tx_hash"))?,
            })
        })
        .transpose()
    }

    async fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO listings (hash_id, seller, min_value, to_address, tx_hash)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (hash_id) DO UPDATE SET
                   seller = EXCLUDED.seller,
                   min_value = EXCLUDED.min_value,
                   to_address = EXCLUDED.to_address,
                   tx_hash = EXCLUDED.tx_hash"#,
        )
        .bind(hex32(&listing.hash_id))
        .bind(hex_addr(&listing.seller))
        .bind(listing.min_value.to_string())
        .bind(listing.to_address.as_ref().map(hex_addr))
        .bind(hex32(&listing.tx_hash))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_listing(&self, hash_id: B256) -> Result<()> {
        sqlx::query(r#"DELETE FROM listings WHERE hash_id = $1"#)
            .bind(hex32(&hash_id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_bid(&self, hash_id: B256) -> Result<Option<Bid>> {
        let row = sqlx::query(
            r#"SELECT hash_id, bidder, value, tx_hash FROM bids WHERE hash_id = $1"#,
        )
        .bind(hex32(&hash_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(Bid {
                hash_id: parse32(row.get("hash_id"))?,
                bidder: parse_addr(row.get("bidder"))?,
                value: parse_u256(row.get("value"))?,
                tx_hash: parse32(row.get("tx_hash"))?,
            })
        })
        .transpose()
    }

    async fn upsert_bid(&self, bid: &Bid) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO bids (hash_id, bidder, value, tx_hash)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (hash_id) DO UPDATE SET
                   bidder = EXCLUDED.bidder,
                   value = EXCLUDED.value,
                   tx_hash = EXCLUDED.tx_hash"#,
        )
        .bind(hex32(&bid.hash_id))
        .bind(hex_addr(&bid.bidder))
        .bind(bid.value.to_string())
        .bind(hex32(&bid.tx_hash))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn remove_bid(&self, hash_id: B256) -> Result<()> {
        sqlx::query(r#"DELETE FROM bids WHERE hash_id = $1"#)
            .bind(hex32(&hash_id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_user(&self, address: Address) -> Result<()> {
        sqlx::query(r#"INSERT INTO users (address) VALUES ($1) ON CONFLICT DO NOTHING"#)
            .bind(hex_addr(&address))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn add_points(
        &self,
        address: Address,
        amount: U256,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO points_events (tx_hash, log_index, address, amount)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (tx_hash, log_index) DO NOTHING"#,
        )
        .bind(hex32(&tx_hash))
        .bind(log_index as i64)
        .bind(hex_addr(&address))
        .bind(amount.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn points_balance(&self, address: Address) -> Result<U256> {
        let row = sqlx::query(
            r#"SELECT COALESCE(SUM(amount::NUMERIC), 0)::TEXT AS total
               FROM points_events WHERE address = $1"#,
        )
        .bind(hex_addr(&address))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        parse_u256(row.get("total"))
    }

    async fn record_event(&self, event: &EventRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO events (tx_hash, log_index, chain, block_number, kind,
                                   hash_id, from_address, to_address, value)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                   chain = EXCLUDED.chain,
                   block_number = EXCLUDED.block_number,
                   kind = EXCLUDED.kind,
                   hash_id = EXCLUDED.hash_id,
                   from_address = EXCLUDED.from_address,
                   to_address = EXCLUDED.to_address,
                   value = EXCLUDED.value"#,
        )
        .bind(hex32(&event.tx_hash))
        .bind(event.log_index as i64)
        .bind(event.chain.as_str())
        .bind(event.block_number as i64)
        .bind(&event.kind)
        .bind(event.hash_id.as_ref().map(hex32))
        .bind(event.from.as_ref().map(hex_addr))
        .bind(event.to.as_ref().map(hex_addr))
        .bind(event.value.map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_event(&self, tx_hash: B256, log_index: u64) -> Result<Option<EventRecord>> {
        let row = sqlx::query(
            r#"SELECT tx_hash, log_index, chain, block_number, kind,
                      hash_id, from_address, to_address, value
               FROM events WHERE tx_hash = $1 AND log_index = $2"#,
        )
        .bind(hex32(&tx_hash))
        .bind(log_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            let chain: String = row.get("chain");
            let hash_id: Option<String> = row.get("hash_id");
            let from: Option<String> = row.get("from_address");
            let to: Option<String> = row.get("to_address");
            let value: Option<String> = row.get("value");
            Ok(EventRecord {
                chain: chain
                    .parse()
                    .map_err(|e: String| IndexerError::Permanent(e))?,
                block_number: row.get::<i64, _>("block_number") as u64,
                tx_hash: parse32(row.get("tx_hash"))?,
                log_index: row.get::<i64, _>("log_index") as u64,
                kind: row.get("kind"),
                hash_id: hash_id.as_deref().map(parse32).transpose()?,
                from: from.as_deref().map(parse_addr).transpose()?,
                to: to.as_deref().map(parse_addr).transpose()?,
                value: value.as_deref().map(parse_u256).transpose()?,
            })
        })
        .transpose()
    }

    async fn get_mint_job(&self, hash_id: B256) -> Result<Option<MintJob>> {
        let row = sqlx::query(
            r#"SELECT hash_id, status, nonce, l2_tx_hash, attempts, failure_reason
               FROM mint_jobs WHERE hash_id = $1"#,
        )
        .bind(hex32(&hash_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            let status: String = row.get("status");
            let l2_tx_hash: Option<String> = row.get("l2_tx_hash");
            Ok(MintJob {
                hash_id: parse32(row.get("hash_id"))?,
                status: status
                    .parse::<MintStatus>()
                    .map_err(IndexerError::Permanent)?,
                nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
                l2_tx_hash: l2_tx_hash.as_deref().map(parse32).transpose()?,
                attempts: row.get::<i32, _>("attempts") as u32,
                failure_reason: row.get("failure_reason"),
            })
        })
        .transpose()
    }

    async fn put_mint_job(&self, job: &MintJob) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO mint_jobs (hash_id, status, nonce, l2_tx_hash, attempts, failure_reason)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (hash_id) DO UPDATE SET
                   status = EXCLUDED.status,
                   nonce = EXCLUDED.nonce,
                   l2_tx_hash = EXCLUDED.l2_tx_hash,
                   attempts = EXCLUDED.attempts,
                   failure_reason = EXCLUDED.failure_reason,
                   updated_at = NOW()"#,
        )
        .bind(hex32(&job.hash_id))
        .bind(job.status.as_str())
        .bind(job.nonce.map(|n| n as i64))
        .bind(job.l2_tx_hash.as_ref().map(hex32))
        .bind(job.attempts as i32)
        .bind(&job.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn last_processed_block(&self, chain: Chain) -> Result<Option<u64>> {
        let row = sqlx::query(r#"SELECT last_block FROM cursors WHERE chain = $1"#)
            .bind(chain.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|row| row.get::<i64, _>("last_block") as u64))
    }

    async fn set_last_processed_block(&self, chain: Chain, block_number: u64) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO cursors (chain, last_block) VALUES ($1, $2)
               ON CONFLICT (chain) DO UPDATE SET last_block = EXCLUDED.last_block"#,
        )
        .bind(chain.as_str())
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
