// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repeat record queries: registration, due selection, leasing and
//! operator-facing listing.

use chrono::{DateTime, Utc};
use repeaters_core::{
    ClaimedRecord, RecordCounts, RecordFilter, RecordState, RepeatRecord, RepeaterError,
    SelectionScope, Transition,
};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};

use crate::database::{
    Database, map_tr_err, millis_column, opt_millis_column, parsed_column, to_millis,
};

pub(crate) const RECORD_COLUMNS: &str = "r.id, r.domain, r.repeater_id, r.payload_id, \
     r.payload_type, r.state, r.registered_at, r.next_check, r.failure_reason";

/// States the scheduler may select, as SQL.
const SELECTABLE: &str = "('PENDING', 'FAILURE')";

pub(crate) fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepeatRecord> {
    Ok(RepeatRecord {
        id: row.get(0)?,
        domain: row.get(1)?,
        repeater_id: row.get(2)?,
        payload_id: row.get(3)?,
        payload_type: parsed_column(row, 4)?,
        state: parsed_column(row, 5)?,
        registered_at: millis_column(row, 6)?,
        next_check: opt_millis_column(row, 7)?,
        failure_reason: row.get(8)?,
    })
}

pub(crate) fn fetch_record(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<RepeatRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM repeat_records r WHERE r.id = ?1"),
        params![id],
        record_from_row,
    )
    .optional()
}

pub(crate) fn insert_record_row(
    conn: &rusqlite::Connection,
    record: &RepeatRecord,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO repeat_records
             (id, domain, repeater_id, payload_id, payload_type, state,
              registered_at, next_check, failure_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.domain,
            record.repeater_id,
            record.payload_id,
            record.payload_type.to_string(),
            record.state.to_string(),
            to_millis(record.registered_at),
            record.next_check.map(to_millis),
            record.failure_reason,
        ],
    )?;
    Ok(())
}

pub async fn insert_record(db: &Database, record: &RepeatRecord) -> Result<(), RepeaterError> {
    let record = record.clone();
    db.connection()
        .call(move |conn| insert_record_row(conn, &record))
        .await
        .map_err(map_tr_err)
}

pub async fn get_record(db: &Database, id: &str) -> Result<Option<RepeatRecord>, RepeaterError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| fetch_record(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Builds the WHERE clause and bound values for a [`RecordFilter`].
fn filter_clause(filter: &RecordFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(domain) = &filter.domain {
        clauses.push("r.domain = ?");
        values.push(Value::Text(domain.clone()));
    }
    if let Some(repeater_id) = &filter.repeater_id {
        clauses.push("r.repeater_id = ?");
        values.push(Value::Text(repeater_id.clone()));
    }
    if let Some(state) = filter.state {
        clauses.push("r.state = ?");
        values.push(Value::Text(state.to_string()));
    }
    if let Some(payload_id) = &filter.payload_id {
        clauses.push("r.payload_id = ?");
        values.push(Value::Text(payload_id.clone()));
    }
    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

/// Paged listing, newest registration first.
pub async fn list_records(
    db: &Database,
    filter: &RecordFilter,
    offset: u64,
    limit: u64,
) -> Result<Vec<RepeatRecord>, RepeaterError> {
    let (where_clause, mut values) = filter_clause(filter);
    values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
    db.connection()
        .call(move |conn| -> Result<Vec<RepeatRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM repeat_records r {where_clause}
                 ORDER BY r.registered_at DESC, r.id
                 LIMIT ? OFFSET ?"
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), record_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_records(db: &Database, filter: &RecordFilter) -> Result<u64, RepeaterError> {
    let (where_clause, values) = filter_clause(filter);
    let count = db
        .connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM repeat_records r {where_clause}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(count.max(0) as u64)
}

/// Counts by state plus the number of selectable records whose `next_check`
/// is before `overdue_before`.
pub async fn record_counts(
    db: &Database,
    domain: Option<&str>,
    overdue_before: DateTime<Utc>,
) -> Result<RecordCounts, RepeaterError> {
    let domain = domain.map(str::to_string);
    let overdue_before = to_millis(overdue_before);
    db.connection()
        .call(move |conn| -> Result<RecordCounts, rusqlite::Error> {
            let mut counts = RecordCounts::default();
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM repeat_records
                 WHERE ?1 IS NULL OR domain = ?1
                 GROUP BY state",
            )?;
            let rows = stmt.query_map(params![domain], |row| {
                Ok((parsed_column::<RecordState>(row, 0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (state, n) = row?;
                let n = n.max(0) as u64;
                match state {
                    RecordState::Pending => counts.pending = n,
                    RecordState::Success => counts.success = n,
                    RecordState::Failure => counts.failure = n,
                    RecordState::Cancelled => counts.cancelled = n,
                }
            }
            let overdue: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM repeat_records
                     WHERE (?1 IS NULL OR domain = ?1)
                       AND state IN {SELECTABLE} AND next_check < ?2"
                ),
                params![domain, overdue_before],
                |row| row.get(0),
            )?;
            counts.overdue = overdue.max(0) as u64;
            Ok(counts)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn domains_with_records(db: &Database) -> Result<Vec<String>, RepeaterError> {
    db.connection()
        .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt =
                conn.prepare("SELECT DISTINCT domain FROM repeat_records ORDER BY domain")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Due, unleased records of enabled repeaters, oldest `next_check` first.
pub async fn select_due(
    db: &Database,
    scope: &SelectionScope,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<RepeatRecord>, RepeaterError> {
    let now = to_millis(now);
    let mut sql = format!(
        "SELECT {RECORD_COLUMNS}
         FROM repeat_records r JOIN repeaters p ON p.id = r.repeater_id
         WHERE r.state IN {SELECTABLE}
           AND r.next_check <= ?
           AND p.enabled = 1
           AND (r.claimed_until IS NULL OR r.claimed_until <= ?)"
    );
    let mut values = vec![Value::Integer(now), Value::Integer(now)];
    for (clause, ids) in [
        ("r.domain IN", &scope.domains),
        ("r.repeater_id IN", &scope.repeater_ids),
        ("r.repeater_id NOT IN", &scope.excluded_repeater_ids),
    ] {
        if !ids.is_empty() {
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND {clause} ({placeholders})"));
            values.extend(ids.iter().cloned().map(Value::Text));
        }
    }
    sql.push_str(" ORDER BY r.next_check ASC, r.registered_at ASC LIMIT ?");
    values.push(Value::Integer(i64::from(limit)));

    db.connection()
        .call(move |conn| -> Result<Vec<RepeatRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), record_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Conditionally take the lease on a due record.
///
/// The UPDATE's WHERE clause is the whole race: of several concurrent
/// claimants exactly one sees a changed row.
pub async fn claim(
    db: &Database,
    record_id: &str,
    worker_id: &str,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
) -> Result<Option<ClaimedRecord>, RepeaterError> {
    let record_id = record_id.to_string();
    let token = format!("{worker_id}:{}", uuid::Uuid::new_v4());
    let now = to_millis(now);
    let lease_until = to_millis(lease_until);

    db.connection()
        .call(move |conn| -> Result<Option<ClaimedRecord>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                &format!(
                    "UPDATE repeat_records SET claimed_by = ?2, claimed_until = ?3
                     WHERE id = ?1
                       AND state IN {SELECTABLE}
                       AND next_check <= ?4
                       AND (claimed_until IS NULL OR claimed_until <= ?4)"
                ),
                params![record_id, token, lease_until, now],
            )?;
            if changed == 0 {
                tx.commit()?;
                return Ok(None);
            }
            let record = fetch_record(&tx, &record_id)?;
            let prior_attempts: i64 = tx.query_row(
                "SELECT COUNT(*) FROM attempts WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(record.map(|record| ClaimedRecord {
                record,
                prior_attempts: u32::try_from(prior_attempts).unwrap_or(u32::MAX),
                claim_token: token,
            }))
        })
        .await
        .map_err(map_tr_err)
}

/// Append the attempt and apply the transition, only while the claim holds.
///
/// Returns `false` (and writes nothing) if the lease was taken over or the
/// record already left a selectable state.
pub async fn complete(
    db: &Database,
    claim: &ClaimedRecord,
    transition: &Transition,
) -> Result<bool, RepeaterError> {
    let record_id = claim.record.id.clone();
    let token = claim.claim_token.clone();
    let transition = transition.clone();

    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let failure_reason = match transition.state {
                RecordState::Success => None,
                _ => Some(transition.message.clone()),
            };
            let changed = tx.execute(
                &format!(
                    "UPDATE repeat_records
                     SET state = ?3, next_check = ?4, failure_reason = ?5,
                         claimed_by = NULL, claimed_until = NULL
                     WHERE id = ?1 AND claimed_by = ?2 AND state IN {SELECTABLE}"
                ),
                params![
                    record_id,
                    token,
                    transition.state.to_string(),
                    transition.next_check.map(to_millis),
                    failure_reason,
                ],
            )?;
            if changed == 0 {
                tx.rollback()?;
                return Ok(false);
            }
            crate::queries::attempts::insert_attempt_row(
                &tx,
                &record_id,
                transition.attempted_at,
                transition.state,
                transition.error_kind,
                &transition.message,
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)
}

/// Push a held lease forward. Fails (returns `false`) once the token no
/// longer matches.
pub async fn renew_claim(
    db: &Database,
    claim: &ClaimedRecord,
    lease_until: DateTime<Utc>,
) -> Result<bool, RepeaterError> {
    let record_id = claim.record.id.clone();
    let token = claim.claim_token.clone();
    let lease_until = to_millis(lease_until);
    let changed = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                &format!(
                    "UPDATE repeat_records SET claimed_until = ?3
                     WHERE id = ?1 AND claimed_by = ?2 AND state IN {SELECTABLE}"
                ),
                params![record_id, token, lease_until],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed == 1)
}

/// Drop a lease without touching state, `next_check` or the attempt log.
pub async fn release(db: &Database, claim: &ClaimedRecord) -> Result<(), RepeaterError> {
    let record_id = claim.record.id.clone();
    let token = claim.claim_token.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE repeat_records SET claimed_by = NULL, claimed_until = NULL
                 WHERE id = ?1 AND claimed_by = ?2",
                params![record_id, token],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Result of an operator action evaluated inside a transaction.
enum OperatorOutcome {
    Missing,
    Terminal(RecordState),
    Done(RepeatRecord),
}

impl OperatorOutcome {
    fn into_result(self, id: &str, action: &'static str) -> Result<RepeatRecord, RepeaterError> {
        match self {
            OperatorOutcome::Missing => Err(RepeaterError::NotFound {
                entity: "repeat record",
                id: id.to_string(),
            }),
            OperatorOutcome::Terminal(state) => Err(RepeaterError::InvalidTransition {
                id: id.to_string(),
                state,
                action,
            }),
            OperatorOutcome::Done(record) => Ok(record),
        }
    }
}

pub const OPERATOR_CANCEL_MESSAGE: &str = "cancelled by operator";

/// Cancel a non-terminal record and log an operator attempt.
pub async fn cancel_record(
    db: &Database,
    record_id: &str,
    now: DateTime<Utc>,
) -> Result<RepeatRecord, RepeaterError> {
    let id = record_id.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<OperatorOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(record) = fetch_record(&tx, &id)? else {
                return Ok(OperatorOutcome::Missing);
            };
            if record.state.is_terminal() {
                return Ok(OperatorOutcome::Terminal(record.state));
            }
            tx.execute(
                "UPDATE repeat_records
                 SET state = 'CANCELLED', next_check = NULL, failure_reason = ?2,
                     claimed_by = NULL, claimed_until = NULL
                 WHERE id = ?1",
                params![id, OPERATOR_CANCEL_MESSAGE],
            )?;
            crate::queries::attempts::insert_attempt_row(
                &tx,
                &id,
                now,
                RecordState::Cancelled,
                None,
                OPERATOR_CANCEL_MESSAGE,
            )?;
            let updated = fetch_record(&tx, &id)?;
            tx.commit()?;
            Ok(updated.map_or(OperatorOutcome::Missing, OperatorOutcome::Done))
        })
        .await
        .map_err(map_tr_err)?;
    outcome.into_result(record_id, "cancel")
}

/// Make a non-terminal record due now. State and attempts are unchanged.
pub async fn retry_now(
    db: &Database,
    record_id: &str,
    now: DateTime<Utc>,
) -> Result<RepeatRecord, RepeaterError> {
    let id = record_id.to_string();
    let now = to_millis(now);
    let outcome = db
        .connection()
        .call(move |conn| -> Result<OperatorOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(record) = fetch_record(&tx, &id)? else {
                return Ok(OperatorOutcome::Missing);
            };
            if record.state.is_terminal() {
                return Ok(OperatorOutcome::Terminal(record.state));
            }
            tx.execute(
                "UPDATE repeat_records SET next_check = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            let updated = fetch_record(&tx, &id)?;
            tx.commit()?;
            Ok(updated.map_or(OperatorOutcome::Missing, OperatorOutcome::Done))
        })
        .await
        .map_err(map_tr_err)?;
    outcome.into_result(record_id, "retry")
}

/// Create a fresh pending record for the same repeater and payload.
///
/// Allowed from any state; the source record is left as it is.
pub async fn resend(
    db: &Database,
    record_id: &str,
    now: DateTime<Utc>,
) -> Result<RepeatRecord, RepeaterError> {
    let id = record_id.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<OperatorOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(source) = fetch_record(&tx, &id)? else {
                return Ok(OperatorOutcome::Missing);
            };
            let fresh = RepeatRecord::new_pending(
                &source.domain,
                &source.repeater_id,
                &source.payload_id,
                source.payload_type,
                now,
            );
            insert_record_row(&tx, &fresh)?;
            tx.commit()?;
            Ok(OperatorOutcome::Done(fresh))
        })
        .await
        .map_err(map_tr_err)?;
    outcome.into_result(record_id, "resend")
}

/// Delete all records of a domain. Attempts go with them by cascade.
pub async fn purge_domain(db: &Database, domain: &str) -> Result<u64, RepeaterError> {
    let domain = domain.to_string();
    let deleted = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM repeat_records WHERE domain = ?1",
                params![domain],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(deleted as u64)
}
