//! Postgres-backed [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fundsync_core::{
    ContactRecord, CrmTotalsRow, DetailRecord, DiscoveredPage, Event, EventId, MasterRecord, Page,
    PageId, PagePriority, PageResult, Priority, PriorityChange, ResultKey, StatsCursor, Totals,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::{Store, StoreResult};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, sqlx::Error> {
    Ok(Event {
        event_id: row.try_get("event_id")?,
        charity_id: row.try_get("charity_id")?,
        name: row.try_get("name")?,
        event_type: row.try_get("event_type")?,
        location: row.try_get("location")?,
        start_date: row.try_get("start_date")?,
        completion_date: row.try_get("completion_date")?,
        expiry_date: row.try_get("expiry_date")?,
        priority: Priority::from_raw(row.try_get("priority")?),
    })
}

fn page_result_from_row(row: &PgRow) -> Result<PageResult, sqlx::Error> {
    Ok(PageResult {
        charity_id: row.try_get("charity_id")?,
        event_id: row.try_get("event_id")?,
        event_name: row.try_get("event_name")?,
        page_short_name: row
            .try_get::<Option<String>, _>("page_short_name")?
            .filter(|name| !name.is_empty()),
        key: ResultKey {
            page_id: row.try_get("page_id")?,
            year: row.try_get("year")?,
            month: row.try_get("month")?,
            day: row.try_get("day")?,
        },
        timestamp: row.try_get("timestamp")?,
        totals: Totals {
            target: row.try_get("target")?,
            raised_online: row.try_get("total_raised_online")?,
            raised_offline: row.try_get("total_raised_offline")?,
            raised_sms: row.try_get("total_raised_sms")?,
            estimated_gift_aid: row.try_get("total_estimated_gift_aid")?,
        },
    })
}

const EVENT_COLUMNS: &str = "event_id, charity_id, name, event_type, location, start_date, \
                             completion_date, expiry_date, priority";

#[async_trait]
impl Store for PgStore {
    async fn select_stale_pages(
        &self,
        limit: usize,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Vec<PageId>> {
        let rows = sqlx::query(
            r#"
            SELECT page_id
              FROM justgiving.page_priority
             WHERE priority <> 0
               AND (fundraising_result_timestamp IS NULL OR fundraising_result_timestamp < $1)
             ORDER BY priority ASC, fundraising_result_timestamp ASC NULLS FIRST, page_id ASC
             LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("page_id").map_err(Into::into))
            .collect()
    }

    async fn trusted_events(&self) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM justgiving.event WHERE priority <> 0 \
             ORDER BY priority, event_id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| event_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn find_event(&self, event_id: EventId) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM justgiving.event WHERE event_id = $1");
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(event_from_row).transpose()?)
    }

    async fn trusted_event_starting_at(
        &self,
        start_date: DateTime<Utc>,
    ) -> StoreResult<Option<EventId>> {
        let row = sqlx::query(
            "SELECT event_id FROM justgiving.event WHERE priority <> 0 AND start_date = $1 LIMIT 1",
        )
        .bind(start_date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.try_get("event_id")).transpose()?)
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO justgiving.event
                (event_id, charity_id, name, event_type, location,
                 start_date, completion_date, expiry_date, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.charity_id)
        .bind(&event.name)
        .bind(&event.event_type)
        .bind(&event.location)
        .bind(event.start_date)
        .bind(event.completion_date)
        .bind(event.expiry_date)
        .bind(event.priority.raw())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_page(&self, page_id: PageId) -> StoreResult<Option<Page>> {
        let row = sqlx::query(
            r#"
            SELECT page_id, charity_id, event_id, page_short_name,
                   created_timestamp, updated_timestamp
              FROM justgiving.page
             WHERE page_id = $1
            "#,
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Page {
            page_id: row.try_get("page_id")?,
            charity_id: row.try_get("charity_id")?,
            event_id: row.try_get("event_id")?,
            short_name: row
                .try_get::<Option<String>, _>("page_short_name")?
                .filter(|name| !name.is_empty()),
            created_at: row.try_get("created_timestamp")?,
            updated_at: row.try_get("updated_timestamp")?,
        }))
    }

    async fn insert_page(&self, page: &DiscoveredPage) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO justgiving.page (charity_id, event_id, page_id, page_short_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (page_id) DO NOTHING
            "#,
        )
        .bind(page.charity_id)
        .bind(page.event_id)
        .bind(page.page_id)
        .bind(&page.short_name)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO justgiving.page_priority (page_id) VALUES ($1) ON CONFLICT (page_id) DO NOTHING",
        )
        .bind(page.page_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_page_short_name(
        &self,
        page_id: PageId,
        short_name: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE justgiving.page
               SET page_short_name = $1,
                   updated_timestamp = CURRENT_TIMESTAMP
             WHERE page_id = $2
            "#,
        )
        .bind(short_name)
        .bind(page_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn page_priority(&self, page_id: PageId) -> StoreResult<Option<PagePriority>> {
        let row = sqlx::query(
            r#"
            SELECT page_id, priority, fundraising_result_timestamp
              FROM justgiving.page_priority
             WHERE page_id = $1
            "#,
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(PagePriority {
            page_id: row.try_get("page_id")?,
            priority: Priority::from_raw(row.try_get("priority")?),
            last_synced_at: row.try_get("fundraising_result_timestamp")?,
        }))
    }

    async fn apply_priority(&self, page_id: PageId, change: PriorityChange) -> StoreResult<()> {
        // Every transition other than Exclude is guarded so 0 stays 0.
        let query = match change {
            PriorityChange::Exclude => {
                sqlx::query("UPDATE justgiving.page_priority SET priority = 0 WHERE page_id = $1")
                    .bind(page_id)
            }
            PriorityChange::Demote => sqlx::query(
                "UPDATE justgiving.page_priority \
                    SET priority = CASE WHEN priority = -1 THEN 1 \
                                        WHEN priority = 2147483647 THEN priority \
                                        ELSE priority + 1 END \
                 WHERE page_id = $1 AND priority <> 0",
            )
            .bind(page_id),
            PriorityChange::PromoteTo(priority) => sqlx::query(
                "UPDATE justgiving.page_priority SET priority = $2 \
                 WHERE page_id = $1 AND priority <> 0",
            )
            .bind(page_id)
            .bind(priority),
            PriorityChange::RecoverTo(priority) => sqlx::query(
                "UPDATE justgiving.page_priority SET priority = $2 \
                 WHERE page_id = $1 AND priority <> 0 AND priority > $2",
            )
            .bind(page_id)
            .bind(priority),
        };
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn mark_synced(&self, page_id: PageId, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE justgiving.page_priority SET fundraising_result_timestamp = $2 WHERE page_id = $1",
        )
        .bind(page_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_baseline_if_absent(
        &self,
        page_id: PageId,
        totals: &Totals,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO justgiving.fundraising_result
                (page_id, year, month, day, target, total_raised_percentage_of_target,
                 total_raised_offline, total_raised_online, total_raised_sms,
                 total_estimated_gift_aid)
            VALUES ($1, 0, 0, 0, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (page_id, year, month, day) DO NOTHING
            "#,
        )
        .bind(page_id)
        .bind(totals.target)
        .bind(totals.percentage_of_target())
        .bind(totals.raised_offline)
        .bind(totals.raised_online)
        .bind(totals.raised_sms)
        .bind(totals.estimated_gift_aid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_daily_result(&self, key: ResultKey, totals: &Totals) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO justgiving.fundraising_result AS r
                (page_id, year, month, day, target, total_raised_percentage_of_target,
                 total_raised_offline, total_raised_online, total_raised_sms,
                 total_estimated_gift_aid)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (page_id, year, month, day) DO UPDATE
               SET target = EXCLUDED.target,
                   total_raised_percentage_of_target = EXCLUDED.total_raised_percentage_of_target,
                   total_raised_offline = EXCLUDED.total_raised_offline,
                   total_raised_online = EXCLUDED.total_raised_online,
                   total_raised_sms = EXCLUDED.total_raised_sms,
                   total_estimated_gift_aid = EXCLUDED.total_estimated_gift_aid,
                   updated_timestamp = CURRENT_TIMESTAMP
             WHERE (r.target, r.total_raised_offline, r.total_raised_online,
                    r.total_raised_sms, r.total_estimated_gift_aid)
                   IS DISTINCT FROM
                   (EXCLUDED.target, EXCLUDED.total_raised_offline, EXCLUDED.total_raised_online,
                    EXCLUDED.total_raised_sms, EXCLUDED.total_estimated_gift_aid)
            "#,
        )
        .bind(key.page_id)
        .bind(key.year)
        .bind(key.month)
        .bind(key.day)
        .bind(totals.target)
        .bind(totals.percentage_of_target())
        .bind(totals.raised_offline)
        .bind(totals.raised_online)
        .bind(totals.raised_sms)
        .bind(totals.estimated_gift_aid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn page_results(
        &self,
        page_id: PageId,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PageResult>> {
        // LIMIT NULL is LIMIT ALL
        let rows = sqlx::query(
            r#"
            SELECT charity_id, event_id, event_name, page_id, page_short_name,
                   year, month, day, timestamp,
                   total_raised_offline, total_raised_online, total_raised_sms,
                   total_estimated_gift_aid, target
              FROM justgiving.event_page_fundraising_result
             WHERE page_id = $1
             ORDER BY year DESC, month DESC, day DESC
             LIMIT $2
            "#,
        )
        .bind(page_id)
        .bind(limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| page_result_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn unmatched_contacts(&self) -> StoreResult<Vec<ContactRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.sfid, c.jg_charity_id__c, c.event_id__c, c.fundraising_page_id__c,
                   c.fundraising_page_url__c, c.fundraising_team_page_url__c,
                   CASE WHEN c.fundraiser_jg_email__c IS NULL OR c.fundraiser_jg_email__c = ''
                        THEN c.email
                        ELSE c.fundraiser_jg_email__c
                   END AS email
              FROM salesforce.contact c
              LEFT OUTER JOIN salesforce.donation_stats__c d
                ON c.sfid = d.related_contact_record__c
             WHERE d.id IS NULL
             ORDER BY c.systemmodstamp DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut contacts = Vec::with_capacity(rows.len());
        for row in rows {
            contacts.push(ContactRecord {
                id: row
                    .try_get::<Option<String>, _>("sfid")?
                    .unwrap_or_default(),
                charity_id: row.try_get("jg_charity_id__c")?,
                event_id: row.try_get("event_id__c")?,
                page_id: row.try_get("fundraising_page_id__c")?,
                page_url: row.try_get("fundraising_page_url__c")?,
                team_page_url: row.try_get("fundraising_team_page_url__c")?,
                email: row.try_get("email")?,
            });
        }
        Ok(contacts)
    }

    async fn master_record_exists(&self, page_id: PageId) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS found
              FROM salesforce.donation_stats__c
             WHERE fundraising_page_id__c = $1 AND transaction_date__c IS NULL
            "#,
        )
        .bind(page_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_master_record(&self, record: &MasterRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO salesforce.donation_stats__c
                (fundraising_page_id__c, related_contact_record__c, initial_raised_online__c,
                 initial_raised_sms__c, initial_raised_offline__c, initial_estimated_gift_aid__c,
                 initial_pledge_amount__c, fundraising_portal_used__c, event_id__c,
                 jg_charity_id__c, event_name__c, fundraising_page_url__c)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.page_id.to_string())
        .bind(&record.contact_id)
        .bind(record.initial.raised_online)
        .bind(record.initial.raised_sms)
        .bind(record.initial.raised_offline)
        .bind(record.initial.estimated_gift_aid)
        .bind(record.initial.target)
        .bind(&record.portal)
        .bind(record.event_id.to_string())
        .bind(record.charity_id.to_string())
        .bind(&record.event_name)
        .bind(&record.page_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats_cursors(&self) -> StoreResult<Vec<StatsCursor>> {
        let rows = sqlx::query(
            r#"
            SELECT fundraising_page_id__c AS page_id,
                   MAX(transaction_date__c) AS last_transaction
              FROM salesforce.donation_stats__c
             GROUP BY fundraising_page_id__c
            HAVING BOOL_OR(transaction_date__c IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut cursors = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("page_id")?;
            let Ok(page_id) = raw.trim().parse::<PageId>() else {
                warn!(page_id = %raw, "skipping donation stats with non-numeric page id");
                continue;
            };
            cursors.push(StatsCursor {
                page_id,
                last_transaction: row.try_get("last_transaction")?,
            });
        }
        Ok(cursors)
    }

    async fn update_master_page_url(&self, page_id: PageId, url: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE salesforce.donation_stats__c
               SET fundraising_page_url__c = $2
             WHERE fundraising_page_id__c = $1
               AND transaction_date__c IS NULL
               AND (fundraising_page_url__c IS NULL OR fundraising_page_url__c <> $2)
            "#,
        )
        .bind(page_id.to_string())
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn crm_current_totals(&self, page_id: PageId) -> StoreResult<Option<CrmTotalsRow>> {
        let row = sqlx::query(
            r#"
            SELECT contact_id, raised_online, raised_sms, raised_offline,
                   estimated_gift_aid, target_amount
              FROM salesforce.contact_page_fundraising_result
             WHERE page_id = $1
            "#,
        )
        .bind(page_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CrmTotalsRow {
            page_id,
            contact_id: row.try_get::<Option<String>, _>("contact_id")?.into(),
            raised_online: row.try_get::<Option<f64>, _>("raised_online")?.into(),
            raised_sms: row.try_get::<Option<f64>, _>("raised_sms")?.into(),
            raised_offline: row.try_get::<Option<f64>, _>("raised_offline")?.into(),
            estimated_gift_aid: row.try_get::<Option<f64>, _>("estimated_gift_aid")?.into(),
            target: row.try_get::<Option<f64>, _>("target_amount")?.into(),
        }))
    }

    async fn insert_detail_record(&self, record: &DetailRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO salesforce.donation_stats__c
                (fundraising_page_id__c, related_contact_record__c, transaction_date__c,
                 raised_online_incremental__c, raised_sms_incremental__c,
                 raised_offline_incremental__c, estimated_gift_aid__c, pledge_amount_revised__c)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.page_id.to_string())
        .bind(&record.contact_id)
        .bind(record.transaction_date)
        .bind(record.deltas.raised_online)
        .bind(record.deltas.raised_sms)
        .bind(record.deltas.raised_offline)
        .bind(record.deltas.estimated_gift_aid)
        .bind(record.deltas.target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
