use crate::domain::{SubscriberEmail, SubscriberName, SubscriptionToken};
use chrono::{DateTime, Duration, Utc};

/// A validated subscription request.
#[derive(Debug)]
pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
    pub slug: String,
}

impl NewSubscriber {
    /// Trims every field, then validates email, optional name and slug.
    pub fn parse(email: String, name: Option<String>, slug: String) -> Result<Self, String> {
        let slug = slug.trim();
        if email.trim().is_empty() || slug.is_empty() {
            return Err("'email' and 'slug' are required".to_string());
        }
        let email = SubscriberEmail::parse(email.trim().to_owned())?;
        let name = name
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())
            .map(SubscriberName::parse)
            .transpose()?;
        Ok(Self {
            email,
            name,
            slug: slug.to_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Verified { verified_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
    pub slug: String,
    pub token: SubscriptionToken,
    pub token_expires_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn pending(
        new_subscriber: NewSubscriber,
        token: SubscriptionToken,
        now: DateTime<Utc>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            email: new_subscriber.email,
            name: new_subscriber.name,
            slug: new_subscriber.slug,
            token,
            token_expires_at: now + token_ttl,
            status: SubscriptionStatus::Pending,
            created_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.status, SubscriptionStatus::Verified { .. })
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            SubscriptionStatus::Verified { verified_at } => Some(verified_at),
            SubscriptionStatus::Pending => None,
        }
    }

    pub fn token_is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.token_expires_at
    }

    /// Replaces an expired token in place. The email never changes.
    pub fn reissue(
        &mut self,
        new_subscriber: NewSubscriber,
        token: SubscriptionToken,
        now: DateTime<Utc>,
        token_ttl: Duration,
    ) {
        debug_assert_eq!(self.email, new_subscriber.email);
        self.name = new_subscriber.name;
        self.slug = new_subscriber.slug;
        self.token = token;
        self.token_expires_at = now + token_ttl;
        self.status = SubscriptionStatus::Pending;
    }

    /// Marks the subscriber as verified and burns the token.
    pub fn verify(&mut self, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Verified { verified_at: now };
        self.token_expires_at = now;
    }

    pub fn recipient(&self) -> Recipient {
        Recipient {
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

/// Someone an email is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: SubscriberEmail,
    pub name: Option<SubscriberName>,
}

impl Recipient {
    /// Display name, falling back to the address itself.
    pub fn greeting_name(&self) -> &str {
        self.name
            .as_ref()
            .map(AsRef::as_ref)
            .unwrap_or_else(|| self.email.as_ref())
    }
}
