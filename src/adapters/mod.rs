//! Storage adapters implementing the repository ports.

pub mod memory;
pub mod postgres_booking_repository;
pub mod postgres_ticket_repository;
pub mod postgres_user_repository;

pub use memory::MemoryStore;
pub use postgres_booking_repository::PostgresBookingRepository;
pub use postgres_ticket_repository::PostgresTicketRepository;
pub use postgres_user_repository::PostgresUserRepository;
