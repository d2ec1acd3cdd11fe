mod issue;
mod subscriber;
mod subscriber_email;
mod subscriber_name;
mod subscription_token;

pub use issue::{Issue, IssueRef, IssueUpdate, NewIssue};
pub use subscriber::{NewSubscriber, Recipient, Subscriber, SubscriptionStatus};
pub use subscriber_email::SubscriberEmail;
pub use subscriber_name::SubscriberName;
pub use subscription_token::SubscriptionToken;
