//! Domain fields carried by pipeline items.
//!
//! The repository and manager are generic over [`PipelineFields`]; deals and
//! buyers differ only in the document they store and in which field acts as
//! the searchable title and the summed value.

use std::fmt::Debug;

use entity::PipelineKind;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub trait PipelineFields:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Patch: Clone + Debug + Default + Send + Sync + 'static;

    const KIND: PipelineKind;

    fn title(&self) -> &str;

    fn value(&self) -> Option<f64>;

    fn apply(&mut self, patch: Self::Patch);

    fn is_empty_patch(patch: &Self::Patch) -> bool;
}

fn default_currency() -> String {
    "RUB".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealFields {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

impl DealFields {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            amount: None,
            currency: default_currency(),
            client_id: None,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct DealPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub client_id: Option<Uuid>,
}

impl PipelineFields for DealFields {
    type Patch = DealPatch;

    const KIND: PipelineKind = PipelineKind::Deal;

    fn title(&self) -> &str {
        &self.title
    }

    fn value(&self) -> Option<f64> {
        self.amount
    }

    fn apply(&mut self, patch: DealPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(amount) = patch.amount {
            self.amount = Some(amount);
        }
        if let Some(currency) = patch.currency {
            self.currency = currency;
        }
        if let Some(client_id) = patch.client_id {
            self.client_id = Some(client_id);
        }
    }

    fn is_empty_patch(patch: &DealPatch) -> bool {
        patch.title.is_none()
            && patch.description.is_none()
            && patch.amount.is_none()
            && patch.currency.is_none()
            && patch.client_id.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuyerFields {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub potential_value: Option<f64>,
}

impl BuyerFields {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            phone: None,
            company: None,
            address: None,
            notes: None,
            potential_value: None,
        }
    }

    pub fn with_potential_value(mut self, value: f64) -> Self {
        self.potential_value = Some(value);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct BuyerPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub potential_value: Option<f64>,
}

impl PipelineFields for BuyerFields {
    type Patch = BuyerPatch;

    const KIND: PipelineKind = PipelineKind::Buyer;

    fn title(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Option<f64> {
        self.potential_value
    }

    fn apply(&mut self, patch: BuyerPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = Some(email);
        }
        if let Some(phone) = patch.phone {
            self.phone = Some(phone);
        }
        if let Some(company) = patch.company {
            self.company = Some(company);
        }
        if let Some(address) = patch.address {
            self.address = Some(address);
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes);
        }
        if let Some(potential_value) = patch.potential_value {
            self.potential_value = Some(potential_value);
        }
    }

    fn is_empty_patch(patch: &BuyerPatch) -> bool {
        patch.name.is_none()
            && patch.email.is_none()
            && patch.phone.is_none()
            && patch.company.is_none()
            && patch.address.is_none()
            && patch.notes.is_none()
            && patch.potential_value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_currency_defaults_to_rub() {
        let fields: DealFields = serde_json::from_value(serde_json::json!({ "title": "Fleet" }))
            .expect("deal fields");
        assert_eq!(fields.currency, "RUB");
        assert_eq!(fields.title(), "Fleet");
        assert_eq!(fields.value(), None);
    }

    #[test]
    fn buyer_patch_keeps_unset_fields() {
        let mut buyer = BuyerFields::new("Ivan").with_potential_value(10.0);
        buyer.email = Some("ivan@example.com".into());
        buyer.apply(BuyerPatch {
            phone: Some("+7 900".into()),
            ..BuyerPatch::default()
        });
        assert_eq!(buyer.email.as_deref(), Some("ivan@example.com"));
        assert_eq!(buyer.phone.as_deref(), Some("+7 900"));
        assert_eq!(buyer.value(), Some(10.0));
        assert!(BuyerFields::is_empty_patch(&BuyerPatch::default()));
    }

    #[test]
    fn deal_patch_overwrites_only_supplied_fields() {
        let mut deal = DealFields::new("Fleet").with_amount(500.0);
        deal.apply(DealPatch {
            title: Some("Fleet renewal".into()),
            currency: Some("EUR".into()),
            ..DealPatch::default()
        });
        assert_eq!(deal.title(), "Fleet renewal");
        assert_eq!(deal.currency, "EUR");
        assert_eq!(deal.value(), Some(500.0));
        assert!(!DealFields::is_empty_patch(&DealPatch {
            amount: Some(1.0),
            ..DealPatch::default()
        }));
    }
}
