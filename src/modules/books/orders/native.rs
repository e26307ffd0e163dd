use bookstore_db::DocumentStore;

use super::{in_stock, take_one, OrderService, PurchaseError};
use crate::modules::books::models::{Book, Customer, Order, BOOKS_COLLECTION, ORDER_COLLECTION};

/// Sells a copy inside a transaction driven by hand on a client session.
///
/// The session is released on every exit path: an early return through `?`
/// drops it, which aborts the open transaction.
pub struct NativeTransactionalOrderService {
    store: DocumentStore,
}

impl NativeTransactionalOrderService {
    pub fn new(store: &DocumentStore) -> Self {
        Self {
            store: store.clone(),
        }
    }
}

impl OrderService for NativeTransactionalOrderService {
    fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError> {
        let order = Order::new(customer, book);

        let session = self.store.start_session();
        session.start_transaction()?;

        self.store
            .collection(ORDER_COLLECTION)
            .insert_one_with_session(&session, order.to_document())?;

        let result = self.store.collection(BOOKS_COLLECTION).update_one_with_session(
            &session,
            &in_stock(book),
            &take_one(),
        )?;

        if result.modified_count != 1 {
            if let Err(error) = session.abort_transaction() {
                tracing::warn!(session = session.id(), %error, "abort after sell-out failed");
            }
            return Err(PurchaseError::SoldOut(book.clone()));
        }

        session.commit_transaction()?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::orders::testing::{orders, stock, store_with_book};
    use bookstore_db::{CommandName, FailPoint, StoreError};

    #[test]
    fn records_a_standalone_order() {
        let (store, book) = store_with_book(1);
        let service = NativeTransactionalOrderService::new(&store);

        let order = service.buy(&Customer::christoph(), &book).unwrap();
        assert_eq!(order.customer, "cstrobl@pivotal.io");
        assert_eq!(stock(&store, &book), 0);
        assert_eq!(orders(&store), 1);
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn sold_out_rolls_back_the_order() {
        let (store, book) = store_with_book(0);
        let service = NativeTransactionalOrderService::new(&store);

        let err = service.buy(&Customer::jeff(), &book).unwrap_err();
        assert!(matches!(err, PurchaseError::SoldOut(_)));
        assert_eq!(orders(&store), 0);
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn failure_after_the_insert_leaves_no_orphan_order() {
        let (store, book) = store_with_book(1);
        store.configure_fail_point(FailPoint::new(
            CommandName::Update,
            StoreError::Unavailable("connection reset".to_string()),
            1,
        ));
        let service = NativeTransactionalOrderService::new(&store);

        let err = service.buy(&Customer::jeff(), &book).unwrap_err();
        assert!(matches!(err, PurchaseError::Store(StoreError::Unavailable(_))));
        assert_eq!(orders(&store), 0);
        assert_eq!(stock(&store, &book), 1);
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn failed_commit_is_rolled_back() {
        let (store, book) = store_with_book(1);
        store.configure_fail_point(FailPoint::write_conflict(CommandName::CommitTransaction, 1));
        let service = NativeTransactionalOrderService::new(&store);

        let err = service.buy(&Customer::jeff(), &book).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(orders(&store), 0);
        assert_eq!(stock(&store, &book), 1);
        assert_eq!(store.active_transactions(), 0);
    }
}
