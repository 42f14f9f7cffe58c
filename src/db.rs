use crate::error::SettleError;
use crate::numeric::{ensure_amount, ensure_rank, Amount, Rank};
use crate::rates::RankRates;
use crate::settlement::{
    ExpenseEntry, ParticipantEntry, RatePolicy, SettlementCalculator, SettlementReport,
    SettlementRow,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub rank: Rank,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: i64,
    pub name: String,
    /// ISO date (YYYY-MM-DD)
    pub date: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub party_id: i64,
    pub name: String,
    pub amount: Amount,
    pub payer_id: i64,
    pub payer_name: String,
    pub created_at: String,
}

/// Member row as found in a roster CSV (`name,rank`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub rank: Rank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub name: String,
    pub amount: Amount,
    pub payer_id: i64,
}

/// Party with its initial participants, expenses and rates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewParty {
    pub name: String,
    pub date: String,
    #[serde(default)]
    pub participants: Vec<i64>,
    #[serde(default)]
    pub expenses: Vec<NewExpense>,
    #[serde(default)]
    pub rank_rates: Option<RankRates>,
}

/// Everything shown on the party page, settlement included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyDetail {
    #[serde(flatten)]
    pub party: Party,
    pub expenses: Vec<Expense>,
    pub participants: Vec<Member>,
    pub rank_rates: RankRates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_error: Option<String>,
}

impl PartyDetail {
    /// Distinct participant ranks, ascending
    pub fn ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.participants.iter().map(|m| m.rank).collect();
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    pub fn expense_entries(&self) -> Vec<ExpenseEntry> {
        self.expenses
            .iter()
            .map(|e| ExpenseEntry {
                amount: e.amount,
                payer_id: e.payer_id,
            })
            .collect()
    }

    pub fn participant_entries(&self) -> Vec<ParticipantEntry> {
        self.participants
            .iter()
            .map(|m| ParticipantEntry {
                id: m.id,
                name: m.name.clone(),
                rank: m.rank,
            })
            .collect()
    }

    pub fn total_amount(&self) -> Amount {
        self.expenses.iter().map(|e| e.amount).sum()
    }
}

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery, foreign keys for cascades
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            rank INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS parties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            party_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            amount INTEGER NOT NULL,
            payer_id INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (party_id) REFERENCES parties (id) ON DELETE CASCADE,
            FOREIGN KEY (payer_id) REFERENCES members (id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS participants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            party_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (party_id) REFERENCES parties (id) ON DELETE CASCADE,
            FOREIGN KEY (member_id) REFERENCES members (id) ON DELETE CASCADE,
            UNIQUE (party_id, member_id)
        );

        CREATE TABLE IF NOT EXISTS rank_rates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            party_id INTEGER NOT NULL,
            rank INTEGER NOT NULL,
            rate REAL NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (party_id) REFERENCES parties (id) ON DELETE CASCADE,
            UNIQUE (party_id, rank)
        );

        -- Audit trail
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_party ON expenses(party_id);
        CREATE INDEX IF NOT EXISTS idx_participants_party ON participants(party_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )
    .context("Failed to create schema")?;

    debug!("database schema ready");
    Ok(())
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database opened");
    Ok(conn)
}

// ============================================================================
// VALIDATION
// ============================================================================

fn ensure_name(field: &str, name: &str) -> Result<(), SettleError> {
    if name.trim().is_empty() {
        return Err(SettleError::invalid(format!("{} is required", field)));
    }
    Ok(())
}

fn ensure_date(date: &str) -> Result<(), SettleError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| SettleError::invalid(format!("date must be YYYY-MM-DD, got '{}'", date)))
}

fn ensure_member(member: &NewMember) -> Result<(), SettleError> {
    ensure_name("member name", &member.name)?;
    ensure_rank(member.rank)
}

fn ensure_expense(expense: &NewExpense) -> Result<(), SettleError> {
    ensure_name("expense name", &expense.name)?;
    ensure_amount(expense.amount)
}

fn ensure_member_exists(conn: &Connection, member_id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM members WHERE id = ?1", [member_id], |row| row.get(0))
        .optional()?;

    if found.is_none() {
        return Err(SettleError::invalid(format!("member {} does not exist", member_id)).into());
    }
    Ok(())
}

fn ensure_payer_participates(conn: &Connection, party_id: i64, payer_id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM participants WHERE party_id = ?1 AND member_id = ?2",
            params![party_id, payer_id],
            |row| row.get(0),
        )
        .optional()?;

    if found.is_none() {
        return Err(SettleError::invalid(format!(
            "payer {} is not a participant of party {}",
            payer_id, party_id
        ))
        .into());
    }
    Ok(())
}

// ============================================================================
// MEMBERS
// ============================================================================

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        name: row.get(1)?,
        rank: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub fn create_member(conn: &Connection, member: &NewMember) -> Result<Member> {
    ensure_member(member)?;

    conn.execute(
        "INSERT INTO members (name, rank) VALUES (?1, ?2)",
        params![member.name.trim(), member.rank],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, rank = member.rank, "member created");

    get_member(conn, id)?.context("Member vanished after insert")
}

pub fn get_member(conn: &Connection, id: i64) -> Result<Option<Member>> {
    let member = conn
        .query_row(
            "SELECT id, name, rank, created_at, updated_at FROM members WHERE id = ?1",
            [id],
            member_from_row,
        )
        .optional()?;
    Ok(member)
}

pub fn list_members(conn: &Connection) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, rank, created_at, updated_at FROM members ORDER BY name",
    )?;
    let members = stmt
        .query_map([], member_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Returns None when the member does not exist
pub fn update_member(conn: &Connection, id: i64, member: &NewMember) -> Result<Option<Member>> {
    ensure_member(member)?;

    let changed = conn.execute(
        "UPDATE members SET name = ?1, rank = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
        params![member.name.trim(), member.rank, id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_member(conn, id)
}

/// Deleting a member also drops their participations and paid expenses
pub fn delete_member(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM members WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

// ============================================================================
// PARTIES
// ============================================================================

fn party_from_row(row: &Row) -> rusqlite::Result<Party> {
    Ok(Party {
        id: row.get(0)?,
        name: row.get(1)?,
        date: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Create a party together with its initial participants, expenses and
/// rates. All or nothing.
pub fn create_party(conn: &Connection, party: &NewParty) -> Result<Party> {
    ensure_name("party name", &party.name)?;
    ensure_date(&party.date)?;
    for expense in &party.expenses {
        ensure_expense(expense)?;
    }
    if let Some(rates) = &party.rank_rates {
        if !rates.is_empty() {
            rates.validate_commit()?;
        }
    }

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO parties (name, date) VALUES (?1, ?2)",
        params![party.name.trim(), party.date],
    )?;
    let party_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO participants (party_id, member_id) VALUES (?1, ?2)",
        )?;
        for member_id in &party.participants {
            ensure_member_exists(&tx, *member_id)?;
            stmt.execute(params![party_id, member_id])
                .with_context(|| format!("Failed to add participant {}", member_id))?;
        }
    }

    for expense in &party.expenses {
        ensure_payer_participates(&tx, party_id, expense.payer_id)?;
        tx.execute(
            "INSERT INTO expenses (party_id, name, amount, payer_id) VALUES (?1, ?2, ?3, ?4)",
            params![party_id, expense.name.trim(), expense.amount, expense.payer_id],
        )?;
    }

    if let Some(rates) = &party.rank_rates {
        write_rank_rates(&tx, party_id, rates)?;
    }

    let event = Event::new(
        "party_created",
        "party",
        &party_id.to_string(),
        serde_json::json!({
            "name": party.name,
            "date": party.date,
            "participants": party.participants.len(),
            "expenses": party.expenses.len(),
        }),
        "api",
    );
    insert_event(&tx, &event)?;

    tx.commit()?;
    info!(party_id, "party created");

    get_party(conn, party_id)?.context("Party vanished after insert")
}

pub fn get_party(conn: &Connection, id: i64) -> Result<Option<Party>> {
    let party = conn
        .query_row(
            "SELECT id, name, date, created_at, updated_at FROM parties WHERE id = ?1",
            [id],
            party_from_row,
        )
        .optional()?;
    Ok(party)
}

/// Most recent party first
pub fn list_parties(conn: &Connection) -> Result<Vec<Party>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, date, created_at, updated_at FROM parties ORDER BY date DESC, id DESC",
    )?;
    let parties = stmt
        .query_map([], party_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parties)
}

pub fn update_party(conn: &Connection, id: i64, name: &str, date: &str) -> Result<Option<Party>> {
    ensure_name("party name", name)?;
    ensure_date(date)?;

    let changed = conn.execute(
        "UPDATE parties SET name = ?1, date = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
        params![name.trim(), date, id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_party(conn, id)
}

/// Expenses, participants and rates go with the party (ON DELETE CASCADE)
pub fn delete_party(conn: &Connection, id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute("DELETE FROM parties WHERE id = ?1", [id])?;
    if changed == 0 {
        return Ok(false);
    }

    let event = Event::new("party_deleted", "party", &id.to_string(), serde_json::json!({}), "api");
    insert_event(&tx, &event)?;
    tx.commit()?;

    info!(party_id = id, "party deleted");
    Ok(true)
}

// ============================================================================
// PARTICIPANTS
// ============================================================================

/// Add members to a party; members already attending are skipped.
/// Returns the participant list after the change.
pub fn add_participants(conn: &Connection, party_id: i64, member_ids: &[i64]) -> Result<Vec<Member>> {
    if member_ids.is_empty() {
        return Err(SettleError::invalid("member id list is empty").into());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO participants (party_id, member_id) VALUES (?1, ?2)",
        )?;
        for member_id in member_ids {
            ensure_member_exists(&tx, *member_id)?;
            stmt.execute(params![party_id, member_id])
                .with_context(|| format!("Failed to add participant {}", member_id))?;
        }
    }
    tx.commit()?;

    debug!(party_id, added = member_ids.len(), "participants added");
    list_participants(conn, party_id)
}

pub fn remove_participant(conn: &Connection, party_id: i64, member_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM participants WHERE party_id = ?1 AND member_id = ?2",
        params![party_id, member_id],
    )?;
    Ok(changed > 0)
}

/// Members attending a party, in the order they joined
pub fn list_participants(conn: &Connection, party_id: i64) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.name, m.rank, m.created_at, m.updated_at
         FROM participants p
         JOIN members m ON p.member_id = m.id
         WHERE p.party_id = ?1
         ORDER BY p.id",
    )?;
    let members = stmt
        .query_map([party_id], member_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Distinct ranks among a party's participants, ascending
pub fn participant_ranks(conn: &Connection, party_id: i64) -> Result<Vec<Rank>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT m.rank
         FROM participants p
         JOIN members m ON p.member_id = m.id
         WHERE p.party_id = ?1
         ORDER BY m.rank",
    )?;
    let ranks = stmt
        .query_map([party_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ranks)
}

// ============================================================================
// EXPENSES
// ============================================================================

fn expense_from_row(row: &Row) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        party_id: row.get(1)?,
        name: row.get(2)?,
        amount: row.get(3)?,
        payer_id: row.get(4)?,
        payer_name: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const EXPENSE_SELECT: &str = "SELECT e.id, e.party_id, e.name, e.amount, e.payer_id,
        m.name AS payer_name, e.created_at
     FROM expenses e
     JOIN members m ON e.payer_id = m.id";

pub fn add_expense(conn: &Connection, party_id: i64, expense: &NewExpense) -> Result<Expense> {
    ensure_expense(expense)?;
    ensure_payer_participates(conn, party_id, expense.payer_id)?;

    conn.execute(
        "INSERT INTO expenses (party_id, name, amount, payer_id) VALUES (?1, ?2, ?3, ?4)",
        params![party_id, expense.name.trim(), expense.amount, expense.payer_id],
    )?;
    let id = conn.last_insert_rowid();
    debug!(party_id, id, amount = expense.amount, "expense added");

    get_expense(conn, id)?.context("Expense vanished after insert")
}

pub fn get_expense(conn: &Connection, id: i64) -> Result<Option<Expense>> {
    let expense = conn
        .query_row(
            &format!("{} WHERE e.id = ?1", EXPENSE_SELECT),
            [id],
            expense_from_row,
        )
        .optional()?;
    Ok(expense)
}

pub fn update_expense(
    conn: &Connection,
    party_id: i64,
    expense_id: i64,
    expense: &NewExpense,
) -> Result<Option<Expense>> {
    ensure_expense(expense)?;
    ensure_payer_participates(conn, party_id, expense.payer_id)?;

    let changed = conn.execute(
        "UPDATE expenses SET name = ?1, amount = ?2, payer_id = ?3 WHERE id = ?4 AND party_id = ?5",
        params![expense.name.trim(), expense.amount, expense.payer_id, expense_id, party_id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_expense(conn, expense_id)
}

pub fn delete_expense(conn: &Connection, party_id: i64, expense_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM expenses WHERE id = ?1 AND party_id = ?2",
        params![expense_id, party_id],
    )?;
    Ok(changed > 0)
}

pub fn list_expenses(conn: &Connection, party_id: i64) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(&format!("{} WHERE e.party_id = ?1 ORDER BY e.id", EXPENSE_SELECT))?;
    let expenses = stmt
        .query_map([party_id], expense_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(expenses)
}

// ============================================================================
// RANK RATES
// ============================================================================

pub fn get_rank_rates(conn: &Connection, party_id: i64) -> Result<RankRates> {
    let mut stmt =
        conn.prepare("SELECT rank, rate FROM rank_rates WHERE party_id = ?1 ORDER BY rank")?;
    let rates = stmt
        .query_map([party_id], |row| Ok((row.get::<_, Rank>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<Result<RankRates, _>>()?;
    Ok(rates)
}

fn write_rank_rates(conn: &Connection, party_id: i64, rates: &RankRates) -> Result<()> {
    conn.execute("DELETE FROM rank_rates WHERE party_id = ?1", [party_id])?;

    let mut stmt =
        conn.prepare("INSERT INTO rank_rates (party_id, rank, rate) VALUES (?1, ?2, ?3)")?;
    for (rank, rate) in rates.iter() {
        stmt.execute(params![party_id, rank, rate])?;
    }
    Ok(())
}

/// Replace the whole rate set of a party (delete + insert in one
/// transaction, so readers never see a partial set).
pub fn replace_rank_rates(conn: &Connection, party_id: i64, rates: &RankRates) -> Result<RankRates> {
    rates.validate_commit()?;
    if get_party(conn, party_id)?.is_none() {
        anyhow::bail!(NotFound(format!("party {}", party_id)));
    }

    let tx = conn.unchecked_transaction()?;
    write_rank_rates(&tx, party_id, rates)?;

    let event = Event::new(
        "rank_rates_committed",
        "party",
        &party_id.to_string(),
        serde_json::to_value(rates)?,
        "api",
    );
    insert_event(&tx, &event)?;
    tx.commit()?;

    info!(party_id, ranks = rates.len(), "rank rates committed");
    get_rank_rates(conn, party_id)
}

/// Missing record, surfaced by the API as 404
#[derive(Debug, thiserror::Error)]
#[error("not found: {0}")]
pub struct NotFound(pub String);

// ============================================================================
// PARTY DETAIL + SETTLEMENT
// ============================================================================

/// Party with its expenses, participants and rates; settlement left empty
fn read_party_detail(conn: &Connection, party_id: i64) -> Result<Option<PartyDetail>> {
    let party = match get_party(conn, party_id)? {
        Some(party) => party,
        None => return Ok(None),
    };

    Ok(Some(PartyDetail {
        party,
        expenses: list_expenses(conn, party_id)?,
        participants: list_participants(conn, party_id)?,
        rank_rates: get_rank_rates(conn, party_id)?,
        settlement: None,
        settlement_error: None,
    }))
}

fn calculate_settlement(detail: &PartyDetail, policy: RatePolicy) -> Result<SettlementReport, SettleError> {
    SettlementCalculator::with_policy(policy).calculate(
        &detail.expense_entries(),
        &detail.participant_entries(),
        &detail.rank_rates,
    )
}

pub fn load_party_detail(conn: &Connection, party_id: i64, policy: RatePolicy) -> Result<Option<PartyDetail>> {
    let mut detail = match read_party_detail(conn, party_id)? {
        Some(detail) => detail,
        None => return Ok(None),
    };

    match calculate_settlement(&detail, policy) {
        Ok(report) => detail.settlement = Some(report),
        Err(err) => detail.settlement_error = Some(err.to_string()),
    }

    Ok(Some(detail))
}

/// Settlement of one party; errors when the party is missing or the
/// calculator rejects its data
pub fn settle_party(conn: &Connection, party_id: i64, policy: RatePolicy) -> Result<SettlementReport> {
    let detail = read_party_detail(conn, party_id)?
        .ok_or_else(|| NotFound(format!("party {}", party_id)))?;

    Ok(calculate_settlement(&detail, policy)?)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| -> Result<Event> {
            Ok(Event {
                event_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .context("Invalid event timestamp")?
                    .with_timezone(&Utc),
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data).context("Invalid event payload")?,
                actor,
            })
        })
        .collect()
}

// ============================================================================
// CSV IMPORT / EXPORT
// ============================================================================

/// Read a roster CSV with a `name,rank` header
pub fn load_members_csv(csv_path: &Path) -> Result<Vec<NewMember>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut members = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let member: NewMember =
            result.with_context(|| format!("Failed to deserialize member on row {}", line + 1))?;
        ensure_member(&member).with_context(|| format!("Invalid member on row {}", line + 1))?;
        members.push(member);
    }

    Ok(members)
}

/// Insert roster members in one transaction; returns how many were added
pub fn insert_members(conn: &Connection, members: &[NewMember]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("INSERT INTO members (name, rank) VALUES (?1, ?2)")?;
        for member in members {
            ensure_member(member)?;
            stmt.execute(params![member.name.trim(), member.rank])?;
        }
    }
    tx.commit()?;

    info!(count = members.len(), "members imported");
    Ok(members.len())
}

/// Write settlement rows to CSV
pub fn export_settlement_csv(csv_path: &Path, rows: &[SettlementRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create CSV file {:?}", csv_path))?;
    for row in rows {
        wtr.serialize(row).context("Failed to write settlement row")?;
    }
    wtr.flush()?;
    Ok(())
}
