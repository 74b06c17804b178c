// src/tiers.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Subscription tier. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Business,
    Premium,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown {0} name")]
pub struct UnknownName(pub &'static str);

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::Free,
        Tier::Starter,
        Tier::Pro,
        Tier::Business,
        Tier::Premium,
        Tier::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Business => "business",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }

    /// free = 0 .. admin = 5
    pub fn rank(&self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Starter => 1,
            Tier::Pro => 2,
            Tier::Business => 3,
            Tier::Premium => 4,
            Tier::Admin => 5,
        }
    }

    pub fn includes(&self, required: Tier) -> bool {
        self.rank() >= required.rank()
    }

    /// Tiers a customer can buy through the gateway.
    pub fn is_purchasable(&self) -> bool {
        !matches!(self, Tier::Free | Tier::Admin)
    }

    pub fn plan(&self) -> &'static TierPlan {
        &CATALOG[self.rank() as usize]
    }

    /// Strict parse of an externally supplied tier value. No trimming or case folding.
    pub fn parse_strict(value: &str) -> Option<Tier> {
        Tier::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::parse_strict(s).ok_or(UnknownName("tier"))
    }
}

/// Catalog entry for a tier. Prices are monthly, in ZAR.
#[derive(Debug, Serialize, ToSchema)]
pub struct TierPlan {
    pub tier: Tier,
    pub rank: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub price: &'static str,
    pub currency: &'static str,
    pub purchasable: bool,
}

pub static CATALOG: [TierPlan; 6] = [
    TierPlan {
        tier: Tier::Free,
        rank: 0,
        name: "Free",
        description: "One published site on a shared subdomain with branding",
        price: "0.00",
        currency: "ZAR",
        purchasable: false,
    },
    TierPlan {
        tier: Tier::Starter,
        rank: 1,
        name: "Starter",
        description: "Custom domain and no builder branding",
        price: "99.00",
        currency: "ZAR",
        purchasable: true,
    },
    TierPlan {
        tier: Tier::Pro,
        rank: 2,
        name: "Pro",
        description: "Premium templates and site analytics",
        price: "199.00",
        currency: "ZAR",
        purchasable: true,
    },
    TierPlan {
        tier: Tier::Business,
        rank: 3,
        name: "Business",
        description: "Online store blocks and multiple sites",
        price: "399.00",
        currency: "ZAR",
        purchasable: true,
    },
    TierPlan {
        tier: Tier::Premium,
        rank: 4,
        name: "Premium",
        description: "White-label sites and priority support",
        price: "799.00",
        currency: "ZAR",
        purchasable: true,
    },
    TierPlan {
        tier: Tier::Admin,
        rank: 5,
        name: "Admin",
        description: "Operator access, not for sale",
        price: "0.00",
        currency: "ZAR",
        purchasable: false,
    },
];

/// Feature gates. The table is closed: every variant maps to a minimum tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    PublishSite,
    CustomDomain,
    RemoveBranding,
    PremiumTemplates,
    SiteAnalytics,
    EcommerceBlocks,
    MultipleSites,
    PrioritySupport,
    WhiteLabel,
    TemplateAdmin,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::PublishSite,
        Feature::CustomDomain,
        Feature::RemoveBranding,
        Feature::PremiumTemplates,
        Feature::SiteAnalytics,
        Feature::EcommerceBlocks,
        Feature::MultipleSites,
        Feature::PrioritySupport,
        Feature::WhiteLabel,
        Feature::TemplateAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::PublishSite => "publish-site",
            Feature::CustomDomain => "custom-domain",
            Feature::RemoveBranding => "remove-branding",
            Feature::PremiumTemplates => "premium-templates",
            Feature::SiteAnalytics => "site-analytics",
            Feature::EcommerceBlocks => "ecommerce-blocks",
            Feature::MultipleSites => "multiple-sites",
            Feature::PrioritySupport => "priority-support",
            Feature::WhiteLabel => "white-label",
            Feature::TemplateAdmin => "template-admin",
        }
    }

    pub fn minimum_tier(&self) -> Tier {
        match self {
            Feature::PublishSite => Tier::Free,
            Feature::CustomDomain | Feature::RemoveBranding => Tier::Starter,
            Feature::PremiumTemplates | Feature::SiteAnalytics => Tier::Pro,
            Feature::EcommerceBlocks | Feature::MultipleSites => Tier::Business,
            Feature::PrioritySupport | Feature::WhiteLabel => Tier::Premium,
            Feature::TemplateAdmin => Tier::Admin,
        }
    }
}

impl FromStr for Feature {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or(UnknownName("feature"))
    }
}

/// Value of `custom_str3`: what a payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Subscription,
    Service,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Subscription => "subscription",
            PaymentKind::Service => "service",
        }
    }

    pub fn parse_strict(value: &str) -> Option<PaymentKind> {
        match value {
            "subscription" => Some(PaymentKind::Subscription),
            "service" => Some(PaymentKind::Service),
            _ => None,
        }
    }
}
