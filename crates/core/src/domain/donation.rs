use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoodType {
    #[serde(rename = "Baked Goods")]
    BakedGoods,
    #[serde(rename = "Fresh Produce")]
    FreshProduce,
    #[serde(rename = "Pantry Items")]
    PantryItems,
    #[serde(rename = "Prepared Foods")]
    PreparedFoods,
    Other,
}

impl FoodType {
    pub const ALL: [FoodType; 5] = [
        Self::BakedGoods,
        Self::FreshProduce,
        Self::PantryItems,
        Self::PreparedFoods,
        Self::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::BakedGoods => "Baked Goods",
            Self::FreshProduce => "Fresh Produce",
            Self::PantryItems => "Pantry Items",
            Self::PreparedFoods => "Prepared Foods",
            Self::Other => "Other",
        }
    }

    /// Maps a canonical label or a known informal category onto the closed set.
    pub fn from_label(value: &str) -> Option<Self> {
        let key = vocabulary_key(value);
        if let Some(exact) = Self::ALL.iter().find(|kind| vocabulary_key(kind.label()) == key) {
            return Some(*exact);
        }

        match key.as_str() {
            "baked" | "bakery" | "baked good" | "bread" | "pastries" | "pastry" => {
                Some(Self::BakedGoods)
            }
            "produce" | "fresh" | "fruit" | "fruits" | "vegetables" | "veggies" => {
                Some(Self::FreshProduce)
            }
            "pantry" | "pantry item" | "canned goods" | "dry goods" | "non perishable"
            | "nonperishable" => Some(Self::PantryItems),
            "prepared" | "prepared food" | "meals" | "cooked food" | "hot food" => {
                Some(Self::PreparedFoods)
            }
            _ => None,
        }
    }
}

impl fmt::Display for FoodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantityUnit {
    Pounds,
    Kilograms,
    Items,
    Servings,
}

impl QuantityUnit {
    pub const ALL: [QuantityUnit; 4] = [Self::Pounds, Self::Kilograms, Self::Items, Self::Servings];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pounds => "Pounds",
            Self::Kilograms => "Kilograms",
            Self::Items => "Items",
            Self::Servings => "Servings",
        }
    }

    /// Maps a canonical unit or an informal count noun onto the closed set.
    /// Count nouns such as "loaves" or "boxes" become `Items`.
    pub fn from_label(value: &str) -> Option<Self> {
        let key = vocabulary_key(value);
        if let Some(exact) = Self::ALL.iter().find(|unit| vocabulary_key(unit.label()) == key) {
            return Some(*exact);
        }

        match key.as_str() {
            "lb" | "lbs" | "pound" | "#" => Some(Self::Pounds),
            "kg" | "kgs" | "kilo" | "kilos" | "kilogram" => Some(Self::Kilograms),
            "serving" | "portion" | "portions" | "plate" | "plates" | "meal" | "meals" => {
                Some(Self::Servings)
            }
            "item" | "loaf" | "loaves" | "box" | "boxes" | "case" | "cases" | "crate"
            | "crates" | "bag" | "bags" | "tray" | "trays" | "unit" | "units" | "piece"
            | "pieces" | "can" | "cans" | "jar" | "jars" | "bottle" | "bottles" | "pallet"
            | "pallets" | "count" => Some(Self::Items),
            _ => None,
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQuantity")]
pub struct Quantity {
    pub amount: f64,
    pub unit: QuantityUnit,
}

#[derive(Deserialize)]
struct RawQuantity {
    amount: f64,
    unit: QuantityUnit,
}

impl TryFrom<RawQuantity> for Quantity {
    type Error = DomainError;

    fn try_from(raw: RawQuantity) -> Result<Self, Self::Error> {
        Self::new(raw.amount, raw.unit)
    }
}

impl Quantity {
    pub fn new(amount: f64, unit: QuantityUnit) -> Result<Self, DomainError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(DomainError::InvariantViolation(format!(
                "quantity.amount must be a positive number, got {amount}"
            )));
        }
        Ok(Self { amount, unit })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPickupWindow")]
pub struct PickupWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Deserialize)]
struct RawPickupWindow {
    #[serde(alias = "startTime")]
    start: NaiveDateTime,
    #[serde(alias = "endTime")]
    end: NaiveDateTime,
}

impl TryFrom<RawPickupWindow> for PickupWindow {
    type Error = DomainError;

    fn try_from(raw: RawPickupWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl PickupWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, DomainError> {
        if start >= end {
            return Err(DomainError::InvariantViolation(format!(
                "pickup_window.start ({start}) must be before pickup_window.end ({end})"
            )));
        }
        Ok(Self { start, end })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handling {
    #[serde(default)]
    pub refrigeration: bool,
    #[serde(default)]
    pub freezing: bool,
    #[serde(default)]
    pub fragile: bool,
    #[serde(default, rename = "heavyLifting")]
    pub heavy_lifting: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub food_type: FoodType,
    pub quantity: Quantity,
    pub pickup_window: PickupWindow,
    pub handling: Handling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DonationRecord {
    /// Re-checks the invariants that the smart constructors enforce, for values
    /// built field by field.
    pub fn validate(&self) -> Result<(), DomainError> {
        Quantity::new(self.quantity.amount, self.quantity.unit)?;
        PickupWindow::new(self.pickup_window.start, self.pickup_window.end)?;
        Ok(())
    }
}

fn vocabulary_key(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
