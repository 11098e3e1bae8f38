// Purpose: The work items passed from chefs to deliverers, and their generator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::randomness::SeededRng;

pub const MENU: [&str; 5] = ["Margherita", "Pepperoni", "Hawaiian", "Veggie", "BBQ Chicken"];
pub const TOPPINGS: [&str; 6] = ["Cheese", "Olives", "Mushrooms", "Onions", "Bacon", "Spinach"];

const MIN_SIZE: u8 = 8;
const MAX_SIZE: u8 = 15;
const MIN_PRICE_CENTS: u64 = 2000;
const MAX_PRICE_CENTS: u64 = 2999;

/// One prepared order travelling through the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Per-chef sequence number, starting at 1
    pub sequence: u64,
    pub name: String,
    pub size: u8,
    pub topping: String,
    pub price_cents: u64,
}

impl Order {
    /// Ledger category this order books its price under
    pub fn category(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of size {} with {} ({})",
            self.name,
            self.size,
            self.topping,
            format_cents(self.price_cents)
        )
    }
}

/// Render an amount of cents as dollars, e.g. `$23.57`
pub fn format_cents(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

/// Draws random orders from the menu
#[derive(Debug, Clone)]
pub struct OrderGenerator {
    rng: SeededRng,
    next_sequence: u64,
}

impl OrderGenerator {
    pub fn new(rng: SeededRng) -> Self {
        Self {
            rng,
            next_sequence: 1,
        }
    }

    /// Produce the next order
    pub fn next_order(&mut self) -> Order {
        let name = self.rng.choose(&MENU).copied().unwrap_or(MENU[0]);
        let topping = self.rng.choose(&TOPPINGS).copied().unwrap_or(TOPPINGS[0]);
        let order = Order {
            sequence: self.next_sequence,
            name: name.to_string(),
            size: self.rng.gen_range(MIN_SIZE..=MAX_SIZE),
            topping: topping.to_string(),
            price_cents: self.rng.gen_range(MIN_PRICE_CENTS..=MAX_PRICE_CENTS),
        };
        self.next_sequence += 1;
        order
    }
}
