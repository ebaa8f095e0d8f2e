//! Fund conservation across arbitrary sequences of deposits and spends.

mod common;

use common::{account, usdc, Harness};
use custody_types::{Category, SpendRequest};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Deposit(u64),
    Spend(Category, u64),
    Mature,
}

fn category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Operations),
        Just(Category::Reserves),
        Just(Category::Upgrades),
        Just(Category::Profits),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u64..200_000).prop_map(Step::Deposit),
        (category(), 1u64..30_000).prop_map(|(c, amount)| Step::Spend(c, amount)),
        Just(Step::Mature),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The treasury's token balance always equals the sum of its category
    /// balances, whatever succeeds or fails along the way.
    #[test]
    fn category_balances_match_holdings(steps in proptest::collection::vec(step(), 1..25)) {
        let h = Harness::new();
        let t = &h.treasury;

        for step in steps {
            match step {
                Step::Deposit(amount) => h.deposit(amount),
                Step::Spend(category, amount) => {
                    let _ = t.spend(
                        &account("ops-bot"),
                        SpendRequest::new(category, "USDC", amount, "vendor", "generated"),
                    );
                }
                Step::Mature => {
                    h.clock.advance(chrono::Duration::hours(49));
                    for (_, entry) in t.timelocks().unwrap() {
                        let _ = t.execute_timelocked(
                            &account("keeper"),
                            &entry.asset,
                            entry.amount,
                            &entry.recipient,
                            entry.submitted_at,
                        );
                    }
                }
            }

            let split = t.balances_for(&usdc()).unwrap();
            prop_assert_eq!(split.total().unwrap(), h.held("treasury"));
            t.verify().unwrap();
        }

        let paid_out = h.held("vendor");
        let deposited: u64 = t
            .records()
            .unwrap()
            .iter()
            .filter(|r| r.kind == custody_ledger::RecordKind::Credit)
            .map(|r| r.amount)
            .sum();
        prop_assert_eq!(deposited, paid_out + h.held("treasury"));
    }
}
