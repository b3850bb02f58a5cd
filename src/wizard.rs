use crate::catalog::{StoreProduct, StoreVariant};
use crate::generation::ConfirmedImage;
use crate::models::CheckoutSessionRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WizardError {
    #[error("no confirmed image yet")]
    NoImage,
    #[error("no product opened")]
    NoProduct,
    #[error("variant and finished mockup are required before checkout")]
    CheckoutNotReady,
    #[error("step does not allow this transition")]
    InvalidTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Creating,
    SelectingGrid,
    SelectingDetail,
    Checkout,
}

/// Buyer-facing flow state: prompt, then product browsing, then a single
/// product's options, then checkout. Selections downstream of a change are
/// always cleared so a stale preview can never be purchased.
#[derive(Debug, Clone)]
pub struct Wizard {
    step: WizardStep,
    image: Option<ConfirmedImage>,
    product: Option<StoreProduct>,
    variant: Option<StoreVariant>,
    mockup_url: Option<String>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            step: WizardStep::Creating,
            image: None,
            product: None,
            variant: None,
            mockup_url: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn image(&self) -> Option<&ConfirmedImage> {
        self.image.as_ref()
    }

    pub fn product(&self) -> Option<&StoreProduct> {
        self.product.as_ref()
    }

    pub fn variant(&self) -> Option<&StoreVariant> {
        self.variant.as_ref()
    }

    pub fn mockup_url(&self) -> Option<&str> {
        self.mockup_url.as_deref()
    }

    pub fn confirm_image(&mut self, image: ConfirmedImage) -> Result<(), WizardError> {
        if self.step != WizardStep::Creating {
            return Err(WizardError::InvalidTransition);
        }
        self.image = Some(image);
        self.step = WizardStep::SelectingGrid;
        Ok(())
    }

    pub fn open_product(&mut self, product: StoreProduct) -> Result<(), WizardError> {
        match self.step {
            WizardStep::SelectingGrid | WizardStep::SelectingDetail => {
                self.product = Some(product);
                self.variant = None;
                self.mockup_url = None;
                self.step = WizardStep::SelectingDetail;
                Ok(())
            }
            _ => Err(WizardError::InvalidTransition),
        }
    }

    /// Picking a different variant invalidates any rendered preview.
    pub fn select_variant(&mut self, variant: StoreVariant) -> Result<(), WizardError> {
        if self.step != WizardStep::SelectingDetail {
            return Err(WizardError::InvalidTransition);
        }
        if self.product.is_none() {
            return Err(WizardError::NoProduct);
        }
        self.variant = Some(variant);
        self.mockup_url = None;
        Ok(())
    }

    pub fn set_mockup(&mut self, url: String) -> Result<(), WizardError> {
        if self.step != WizardStep::SelectingDetail {
            return Err(WizardError::InvalidTransition);
        }
        if self.variant.is_none() {
            return Err(WizardError::CheckoutNotReady);
        }
        self.mockup_url = Some(url);
        Ok(())
    }

    pub fn proceed_to_checkout(&mut self) -> Result<(), WizardError> {
        if self.step != WizardStep::SelectingDetail {
            return Err(WizardError::InvalidTransition);
        }
        if self.variant.is_none() || self.mockup_url.is_none() {
            return Err(WizardError::CheckoutNotReady);
        }
        self.step = WizardStep::Checkout;
        Ok(())
    }

    pub fn back(&mut self) -> Result<(), WizardError> {
        match self.step {
            WizardStep::SelectingDetail => {
                self.product = None;
                self.variant = None;
                self.mockup_url = None;
                self.step = WizardStep::SelectingGrid;
                Ok(())
            }
            WizardStep::Checkout => {
                self.step = WizardStep::SelectingDetail;
                Ok(())
            }
            _ => Err(WizardError::InvalidTransition),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The payload the checkout endpoint needs, available once the flow
    /// reached the checkout step.
    pub fn checkout_payload(&self, origin: Option<String>) -> Result<CheckoutSessionRequest, WizardError> {
        if self.step != WizardStep::Checkout {
            return Err(WizardError::InvalidTransition);
        }
        let image = self.image.as_ref().ok_or(WizardError::NoImage)?;
        let product = self.product.as_ref().ok_or(WizardError::NoProduct)?;
        let (Some(variant), Some(mockup_url)) = (self.variant.as_ref(), self.mockup_url.clone())
        else {
            return Err(WizardError::CheckoutNotReady);
        };
        Ok(CheckoutSessionRequest {
            product_id: product.id,
            variant_id: variant.id,
            product_title: format!("{} {}", product.title, variant.size),
            selling_price: variant.selling_price,
            mockup_url,
            original_image_url: image.url.clone(),
            origin,
        })
    }
}
