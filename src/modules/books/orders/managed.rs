use bookstore_db::{Collection, DocumentStore, TransactionTemplate};

use super::{in_stock, take_one, OrderService, PurchaseError};
use crate::modules::books::models::{Book, Customer, Order, BOOKS_COLLECTION, ORDER_COLLECTION};

/// Sells a copy as a unit of work run by a [`TransactionTemplate`].
///
/// Any error out of the unit of work, sell-outs included, rolls back both the
/// order insert and the stock update.
pub struct TransactionalOrderService {
    template: TransactionTemplate,
    orders: Collection,
    books: Collection,
}

impl TransactionalOrderService {
    pub fn new(store: &DocumentStore) -> Self {
        Self {
            template: TransactionTemplate::new(store.clone()),
            orders: store.collection(ORDER_COLLECTION),
            books: store.collection(BOOKS_COLLECTION),
        }
    }
}

impl OrderService for TransactionalOrderService {
    fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError> {
        self.template.execute(|session| {
            let order = Order::new(customer, book);
            self.orders
                .insert_one_with_session(session, order.to_document())?;

            let result = self
                .books
                .update_one_with_session(session, &in_stock(book), &take_one())?;
            if result.modified_count == 0 {
                return Err(PurchaseError::SoldOut(book.clone()));
            }
            Ok(order)
        })
    }
}
