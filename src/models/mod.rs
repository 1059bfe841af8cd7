use serde::{Deserialize, Serialize};

/// Direction of an open position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Derive the side from a broker-reported signed quantity (zero has no side)
    pub fn from_signed_qty(qty: f64) -> Option<Self> {
        if qty > 0.0 {
            Some(Side::Long)
        } else if qty < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Order side that reduces a position of this side
    pub fn closing_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// +1.0 for long, -1.0 for short (so profit is always positive-is-good)
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Broker order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level-1 quote for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub bid_price: f64,
    pub ask_price: f64,
}

impl Quote {
    pub fn new(bid_price: f64, ask_price: f64) -> Self {
        Self {
            bid_price,
            ask_price,
        }
    }

    /// Midpoint, falling back to whichever side is usable
    pub fn mark(&self) -> Option<f64> {
        let bid_ok = self.bid_price.is_finite() && self.bid_price > 0.0;
        let ask_ok = self.ask_price.is_finite() && self.ask_price > 0.0;
        match (bid_ok, ask_ok) {
            (true, true) => Some((self.bid_price + self.ask_price) / 2.0),
            (true, false) => Some(self.bid_price),
            (false, true) => Some(self.ask_price),
            (false, false) => None,
        }
    }

    /// Both sides present (entry orders refuse one-sided books)
    pub fn is_two_sided(&self) -> bool {
        self.bid_price > 0.0 && self.ask_price > 0.0
    }
}

/// Premarket snapshot of one screening candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub previous_close: f64,
    pub premarket_price: f64,
    pub premarket_volume: u64,
    pub float_shares: u64,
    pub sentiment_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_signed_qty() {
        assert_eq!(Side::from_signed_qty(100.0), Some(Side::Long));
        assert_eq!(Side::from_signed_qty(-40.0), Some(Side::Short));
        assert_eq!(Side::from_signed_qty(0.0), None);
    }

    #[test]
    fn test_closing_side() {
        assert_eq!(Side::Long.closing_order_side(), OrderSide::Sell);
        assert_eq!(Side::Short.closing_order_side(), OrderSide::Buy);
    }

    #[test]
    fn test_quote_mark() {
        assert_eq!(Quote::new(10.0, 10.2).mark(), Some(10.1));
        assert_eq!(Quote::new(0.0, 10.2).mark(), Some(10.2));
        assert_eq!(Quote::new(9.9, 0.0).mark(), Some(9.9));
        assert_eq!(Quote::new(0.0, 0.0).mark(), None);
        assert_eq!(Quote::new(f64::NAN, 0.0).mark(), None);
    }

    #[test]
    fn test_candidate_deserializes_from_json() {
        let json = r#"{
            "symbol": "GOOD",
            "previous_close": 100.0,
            "premarket_price": 103.5,
            "premarket_volume": 150000,
            "float_shares": 1000000,
            "sentiment_score": 3.5
        }"#;
        let candidate: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.symbol, "GOOD");
        assert_eq!(candidate.premarket_volume, 150_000);
    }
}
