// Familiar Market - Matching Engine
// Decides whether a customer gets a contract, with which familiar, and commits it

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{Connection, TransactionBehavior};

use crate::contracts::{self, Contract, ContractStatus};
use crate::entities::{customer, Customer, Familiar};
use crate::error::MarketError;
use crate::roster;

/// Acceptance probability used by the production oracle.
pub const DEFAULT_ACCEPT_CHANCE: f64 = 0.5;

// ============================================================================
// ACCEPTANCE ORACLE
// ============================================================================

/// The acceptance decision for one (customer, familiar) pairing.
///
/// Injected into `form_contract` so the formation loop never reaches for
/// ambient randomness: production wires a real random source, tests script
/// the answers and get deterministic rosters walks.
pub trait AcceptanceOracle {
    fn accepts(&mut self, customer: &Customer, familiar: &Familiar) -> bool;
}

/// Adapter so a closure can serve as an oracle; tests mostly use this.
pub struct OracleFn<F>(pub F);

impl<F> AcceptanceOracle for OracleFn<F>
where
    F: FnMut(&Customer, &Familiar) -> bool,
{
    fn accepts(&mut self, customer: &Customer, familiar: &Familiar) -> bool {
        (self.0)(customer, familiar)
    }
}

/// Production oracle: an independent coin flip per familiar.
pub struct CoinFlip {
    chance: f64,
    rng: StdRng,
}

impl CoinFlip {
    pub fn new() -> Self {
        Self::with_chance(DEFAULT_ACCEPT_CHANCE)
    }

    pub fn with_chance(chance: f64) -> Self {
        CoinFlip {
            chance: chance.clamp(0.0, 1.0),
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible flips for demos and soak runs.
    pub fn seeded(chance: f64, seed: u64) -> Self {
        CoinFlip {
            chance: chance.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for CoinFlip {
    fn default() -> Self {
        Self::new()
    }
}

impl AcceptanceOracle for CoinFlip {
    fn accepts(&mut self, _customer: &Customer, _familiar: &Familiar) -> bool {
        self.rng.gen_bool(self.chance)
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of a formation attempt. `NoAcceptance` is a normal terminal
/// outcome, not an error: the roster was scanned and nobody said yes.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Formed {
        contract: Contract,
        familiar_name: String,
    },
    NoAcceptance,
}

impl MatchOutcome {
    pub fn contract(&self) -> Option<&Contract> {
        match self {
            MatchOutcome::Formed { contract, .. } => Some(contract),
            MatchOutcome::NoAcceptance => None,
        }
    }
}

// ============================================================================
// FORMATION
// ============================================================================

/// Try to form a contract for a customer.
///
/// Preconditions, checked in order with the first failure reported:
/// customer exists, customer has a group, customer holds no active
/// contract, the group's roster is non-empty. Then the roster is walked in
/// resolver order; familiars already bound to a non-rejected contract are
/// skipped, and the first acceptance inserts an active contract and stops.
///
/// The whole operation runs in one IMMEDIATE transaction: two requests for
/// the same customer serialize, and the loser of any remaining race hits
/// the ledger's unique index and surfaces a retryable `Conflict`.
pub fn form_contract(
    conn: &mut Connection,
    customer_id: i64,
    oracle: &mut dyn AcceptanceOracle,
) -> Result<MatchOutcome, MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = form_in_tx(&tx, customer_id, oracle)?;
    tx.commit()?;
    Ok(outcome)
}

fn form_in_tx(
    tx: &Connection,
    customer_id: i64,
    oracle: &mut dyn AcceptanceOracle,
) -> Result<MatchOutcome, MarketError> {
    let cust = customer::get(tx, customer_id)?;

    let group_id = cust
        .group_id
        .ok_or(MarketError::NoGroupAssigned(customer_id))?;

    if contracts::has_active_for_customer(tx, customer_id)? {
        return Err(MarketError::AlreadyContracted(customer_id));
    }

    let familiars = roster::familiars_of(tx, group_id)?;
    if familiars.is_empty() {
        return Err(MarketError::EmptyGroup(group_id));
    }

    for fam in familiars {
        if contracts::is_claimed(tx, fam.id)? {
            continue;
        }
        if oracle.accepts(&cust, &fam) {
            let contract = contracts::insert(tx, customer_id, fam.id, ContractStatus::Active)?;
            return Ok(MatchOutcome::Formed {
                contract,
                familiar_name: fam.name,
            });
        }
    }

    Ok(MatchOutcome::NoAcceptance)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, setup_database};
    use crate::entities::{familiar, group, NewCustomer, NewFamiliar, NewGroup};
    use crate::error::EntityKind;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    /// Group with `names` as its roster; returns (group_id, familiar ids).
    fn seed_roster(conn: &Connection, names: &[&str]) -> (i64, Vec<i64>) {
        let grp = group::create(conn, &NewGroup::default()).unwrap();
        let ids = names
            .iter()
            .map(|name| {
                familiar::create(
                    conn,
                    &NewFamiliar {
                        name: name.to_string(),
                        group_id: Some(grp.id),
                        ..Default::default()
                    },
                )
                .unwrap()
                .id
            })
            .collect();
        (grp.id, ids)
    }

    fn seed_customer(conn: &Connection, group_id: Option<i64>) -> i64 {
        crate::entities::customer::create(
            conn,
            &NewCustomer {
                name: "Marcus Hale".to_string(),
                group_id,
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn test_missing_customer_is_not_found() {
        let mut conn = test_conn();
        let err = form_contract(&mut conn, 404, &mut OracleFn(|_: &Customer, _: &Familiar| true)).unwrap_err();
        assert!(matches!(
            err,
            MarketError::NotFound {
                entity: EntityKind::Customer,
                ..
            }
        ));
    }

    #[test]
    fn test_no_group_short_circuits_before_roster_scan() {
        let mut conn = test_conn();
        let cust = seed_customer(&conn, None);

        let mut consulted = false;
        let err = form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| {
            consulted = true;
            true
        }))
        .unwrap_err();

        assert!(matches!(err, MarketError::NoGroupAssigned(id) if id == cust));
        assert!(!consulted, "oracle must not run without a group");
    }

    #[test]
    fn test_active_contract_blocks_regardless_of_roster() {
        let mut conn = test_conn();
        let (gid, fams) = seed_roster(&conn, &["Smaug", "Nyx"]);
        let cust = seed_customer(&conn, Some(gid));

        contracts::insert(&conn, cust, fams[0], ContractStatus::Active).unwrap();

        let err =
            form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| true)).unwrap_err();
        assert!(matches!(err, MarketError::AlreadyContracted(id) if id == cust));
    }

    #[test]
    fn test_empty_roster_is_precondition_failure() {
        let mut conn = test_conn();
        let grp = group::create(&conn, &NewGroup::default()).unwrap();
        let cust = seed_customer(&conn, Some(grp.id));

        let err =
            form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| true)).unwrap_err();
        assert!(matches!(err, MarketError::EmptyGroup(id) if id == grp.id));
    }

    #[test]
    fn test_first_acceptance_wins_in_roster_order() {
        let mut conn = test_conn();
        let (gid, fams) = seed_roster(&conn, &["Smaug", "Nyx", "Ember"]);
        let cust = seed_customer(&conn, Some(gid));

        // Smaug and Nyx decline, Ember accepts.
        let mut answers = vec![false, false, true].into_iter();
        let outcome = form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| {
            answers.next().unwrap_or(false)
        }))
        .unwrap();

        let contract = outcome.contract().expect("contract should form");
        assert_eq!(contract.familiar_id, fams[2]);
        assert_eq!(contract.status, ContractStatus::Active);
        match &outcome {
            MatchOutcome::Formed { familiar_name, .. } => assert_eq!(familiar_name, "Ember"),
            MatchOutcome::NoAcceptance => panic!("expected a formed contract"),
        }

        // Nothing was written for the two who declined.
        assert!(contracts::find_by_familiar(&conn, fams[0])
            .unwrap()
            .is_empty());
        assert!(contracts::find_by_familiar(&conn, fams[1])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_scan_stops_at_first_acceptance() {
        let mut conn = test_conn();
        let (gid, _) = seed_roster(&conn, &["Smaug", "Nyx", "Ember"]);
        let cust = seed_customer(&conn, Some(gid));

        let mut evaluated = 0;
        form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| {
            evaluated += 1;
            true
        }))
        .unwrap();
        assert_eq!(evaluated, 1);
    }

    #[test]
    fn test_exhausted_roster_is_success_with_no_contract() {
        let mut conn = test_conn();
        let (gid, _) = seed_roster(&conn, &["Smaug", "Nyx"]);
        let cust = seed_customer(&conn, Some(gid));

        let outcome =
            form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| false)).unwrap();

        assert!(matches!(outcome, MatchOutcome::NoAcceptance));
        assert!(outcome.contract().is_none());
        assert!(contracts::find_by_customer(&conn, cust).unwrap().is_empty());
    }

    #[test]
    fn test_claimed_familiars_are_skipped() {
        let mut conn = test_conn();
        let (gid, fams) = seed_roster(&conn, &["Smaug", "Nyx"]);
        let cust = seed_customer(&conn, Some(gid));
        let rival = seed_customer(&conn, Some(gid));

        // The rival holds Smaug under a pending contract.
        contracts::insert(&conn, rival, fams[0], ContractStatus::Pending).unwrap();

        let mut seen = Vec::new();
        let outcome = form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, f: &Familiar| {
            seen.push(f.id);
            true
        }))
        .unwrap();

        assert_eq!(seen, vec![fams[1]], "claimed familiar must not be offered");
        assert_eq!(outcome.contract().unwrap().familiar_id, fams[1]);
    }

    #[test]
    fn test_rejected_contract_does_not_block_reformation() {
        let mut conn = test_conn();
        let (gid, fams) = seed_roster(&conn, &["Smaug"]);
        let cust = seed_customer(&conn, Some(gid));

        let old = contracts::insert(&conn, cust, fams[0], ContractStatus::Rejected).unwrap();
        assert_eq!(old.status, ContractStatus::Rejected);

        let outcome =
            form_contract(&mut conn, cust, &mut OracleFn(|_: &Customer, _: &Familiar| true)).unwrap();
        assert!(outcome.contract().is_some());
    }

    #[test]
    fn test_coin_flip_is_reproducible_when_seeded() {
        let customer = Customer {
            id: 1,
            group_id: None,
            name: "Marcus Hale".to_string(),
            image: None,
            email: None,
            username: None,
            password: None,
            role: None,
        };
        let familiar = Familiar {
            id: 1,
            group_id: None,
            name: "Smaug".to_string(),
            image: None,
            species: None,
            size: None,
            color: None,
            pattern: None,
            personality: None,
            rarity: None,
            typing: None,
        };

        let mut a = CoinFlip::seeded(0.5, 42);
        let mut b = CoinFlip::seeded(0.5, 42);
        let flips_a: Vec<bool> = (0..32).map(|_| a.accepts(&customer, &familiar)).collect();
        let flips_b: Vec<bool> = (0..32).map(|_| b.accepts(&customer, &familiar)).collect();
        assert_eq!(flips_a, flips_b);

        let mut never = CoinFlip::with_chance(0.0);
        assert!(!never.accepts(&customer, &familiar));
        let mut always = CoinFlip::with_chance(1.0);
        assert!(always.accepts(&customer, &familiar));
    }

    #[test]
    fn test_concurrent_formation_yields_exactly_one_active_contract() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();

        {
            let conn = open_database(&path).unwrap();
            let (gid, _) = seed_roster(&conn, &["Smaug", "Nyx", "Ember"]);
            let cust = seed_customer(&conn, Some(gid));
            assert_eq!(cust, 1);
        }

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut conn = open_database(&path).unwrap();
                    form_contract(&mut conn, 1, &mut OracleFn(|_: &Customer, _: &Familiar| true))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let formed = results
            .iter()
            .filter(|r| matches!(r, Ok(MatchOutcome::Formed { .. })))
            .count();
        let conflicts = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(MarketError::AlreadyContracted(_)) | Err(MarketError::LostRace)
                )
            })
            .count();
        assert_eq!(formed, 1, "exactly one request may form a contract");
        assert_eq!(conflicts, 1, "the other must observe a conflict");

        // The invariant that matters: one active contract for the customer.
        let conn = open_database(&path).unwrap();
        let active: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM contracts WHERE customer_id = 1 AND status = 'active'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(active, 1);
    }
}
