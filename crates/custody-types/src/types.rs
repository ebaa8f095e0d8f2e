use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, CustodyResult};

/// 100.00% expressed in basis points.
pub const BASIS_POINTS_TOTAL: u32 = 10_000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identity key of a registered co-signer.
    OwnerId
);

string_id!(
    /// Any party funds can move to or from: recipients, revenue payers, the treasury itself.
    AccountId
);

string_id!(
    /// Asset code (e.g. "USDC", "ETH").
    AssetId
);

impl From<&OwnerId> for AccountId {
    fn from(owner: &OwnerId) -> Self {
        AccountId(owner.0.clone())
    }
}

/// Sequential identifier of a proposed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The four fixed ledger partitions revenue is split across.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Operations,
    Reserves,
    Upgrades,
    Profits,
}

impl Category {
    /// Split order. Profits is last and absorbs rounding remainders.
    pub const ALL: [Category; 4] = [
        Category::Operations,
        Category::Reserves,
        Category::Upgrades,
        Category::Profits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Operations => "operations",
            Category::Reserves => "reserves",
            Category::Upgrades => "upgrades",
            Category::Profits => "profits",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "operations" => Ok(Category::Operations),
            "reserves" => Ok(Category::Reserves),
            "upgrades" => Ok(Category::Upgrades),
            "profits" => Ok(Category::Profits),
            other => Err(CustodyError::Config(format!("unknown category '{other}'"))),
        }
    }
}

/// Revenue amount broken down per category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySplit {
    pub operations: u64,
    pub reserves: u64,
    pub upgrades: u64,
    pub profits: u64,
}

impl CategorySplit {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Operations => self.operations,
            Category::Reserves => self.reserves,
            Category::Upgrades => self.upgrades,
            Category::Profits => self.profits,
        }
    }

    pub fn set(&mut self, category: Category, amount: u64) {
        match category {
            Category::Operations => self.operations = amount,
            Category::Reserves => self.reserves = amount,
            Category::Upgrades => self.upgrades = amount,
            Category::Profits => self.profits = amount,
        }
    }

    /// Checked sum of all four parts.
    pub fn total(&self) -> CustodyResult<u64> {
        Category::ALL.iter().try_fold(0u64, |acc, c| {
            acc.checked_add(self.get(*c))
                .ok_or_else(|| CustodyError::InvariantViolation("category split overflow".into()))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, u64)> + '_ {
        Category::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}

/// Roles recognized by the administrative surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Configuration, role management, unpause.
    Admin,
    /// Pause and emergency withdrawal.
    Emergency,
    /// Deposits revenue.
    Treasurer,
    /// Issues single-party category spends.
    Spender,
    /// Triggers portfolio rebalancing.
    Rebalancer,
    /// Swaps the active logic. Held by a single account and transferred, never granted.
    UpgradeAuthority,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Role::Admin => "admin",
            Role::Emergency => "emergency",
            Role::Treasurer => "treasurer",
            Role::Spender => "spender",
            Role::Rebalancer => "rebalancer",
            Role::UpgradeAuthority => "upgrade authority",
        };
        f.write_str(label)
    }
}

/// A request to pay `amount` of `asset` out of `category` to `recipient`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    pub category: Category,
    pub asset: AssetId,
    pub amount: u64,
    pub recipient: AccountId,
    pub description: String,
}

impl SpendRequest {
    pub fn new(
        category: Category,
        asset: impl Into<AssetId>,
        amount: u64,
        recipient: impl Into<AccountId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            asset: asset.into(),
            amount,
            recipient: recipient.into(),
            description: description.into(),
        }
    }

    pub fn validate(&self) -> CustodyResult<()> {
        if self.amount == 0 {
            return Err(CustodyError::InvalidAmount("spend amount must be positive".into()));
        }
        if self.asset.is_empty() {
            return Err(CustodyError::UnknownAsset(self.asset.clone()));
        }
        if self.recipient.is_empty() {
            return Err(CustodyError::InvalidDestination);
        }
        Ok(())
    }
}

impl From<String> for AssetId {
    fn from(value: String) -> Self {
        AssetId(value)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        AccountId(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        OwnerId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_and_display() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("marketing".parse::<Category>().is_err());
    }

    #[test]
    fn split_total_and_accessors() {
        let mut split = CategorySplit::default();
        split.set(Category::Operations, 400);
        split.set(Category::Profits, 200);
        assert_eq!(split.get(Category::Operations), 400);
        assert_eq!(split.total().unwrap(), 600);
    }

    #[test]
    fn split_total_overflow_is_invariant_violation() {
        let split = CategorySplit {
            operations: u64::MAX,
            reserves: 1,
            upgrades: 0,
            profits: 0,
        };
        assert!(matches!(
            split.total(),
            Err(CustodyError::InvariantViolation(_))
        ));
    }

    #[test]
    fn spend_request_validation() {
        let ok = SpendRequest::new(Category::Operations, "USDC", 10, "vendor", "hosting");
        assert!(ok.validate().is_ok());

        let zero = SpendRequest::new(Category::Operations, "USDC", 0, "vendor", "hosting");
        assert!(matches!(zero.validate(), Err(CustodyError::InvalidAmount(_))));

        let nobody = SpendRequest::new(Category::Operations, "USDC", 5, " ", "hosting");
        assert!(matches!(nobody.validate(), Err(CustodyError::InvalidDestination)));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&OwnerId::new("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
        assert_eq!(OperationId(7).to_string(), "op-7");
    }
}
