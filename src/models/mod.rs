pub mod account;
pub mod cart;
pub mod money;
pub mod order;
pub mod session;

pub use account::Account;
pub use cart::{Cart, CartLine, ContactDetails};
pub use money::{format_cents, parse_cents};
pub use order::{Order, Ticket};
pub use session::{
    Session, SessionSummary, SessionTicketType, SessionTicketTypeRef, TicketKey, TicketType, Venue,
};
