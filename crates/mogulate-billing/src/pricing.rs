use mogulate_usage::Tier;
use std::collections::HashMap;

/// Maps a subscription's price to a tier.
///
/// Known price ids win; otherwise the unit amount decides.
#[derive(Debug, Clone)]
pub struct PriceCatalog {
    prices: HashMap<String, Tier>,
    pro_min_cents: i64,
}

impl Default for PriceCatalog {
    fn default() -> Self {
        Self {
            prices: HashMap::new(),
            pro_min_cents: 2000,
        }
    }
}

impl PriceCatalog {
    pub fn new(pro_min_cents: i64) -> Self {
        Self {
            prices: HashMap::new(),
            pro_min_cents,
        }
    }

    pub fn with_price(mut self, price_id: impl Into<String>, tier: Tier) -> Self {
        self.prices.insert(price_id.into(), tier);
        self
    }

    pub fn tier_for(&self, price_id: Option<&str>, unit_amount: Option<i64>) -> Tier {
        if let Some(tier) = price_id.and_then(|id| self.prices.get(id)) {
            return *tier;
        }
        match unit_amount {
            Some(cents) if cents >= self.pro_min_cents => Tier::Pro,
            Some(cents) if cents > 0 => Tier::Starter,
            _ => Tier::Free,
        }
    }
}
