use bookstore_db::{Collection, DocumentStore};
use serde_json::Value;

use super::{in_stock, take_one, OrderService, PurchaseError};
use crate::modules::books::models::{Book, Customer, Order, BOOKS_COLLECTION, CHECKOUT_FIELD};

/// Sells a copy with one conditional update of the book document.
///
/// The order is appended to the book's `checkout` array in that same update,
/// so no standalone order document is written.
pub struct AtomicOrderService {
    books: Collection,
}

impl AtomicOrderService {
    pub fn new(store: &DocumentStore) -> Self {
        Self {
            books: store.collection(BOOKS_COLLECTION),
        }
    }
}

impl OrderService for AtomicOrderService {
    fn buy(&self, customer: &Customer, book: &Book) -> Result<Order, PurchaseError> {
        let order = Order::new(customer, book);
        let update = take_one().push(CHECKOUT_FIELD, Value::Object(order.checkout_entry()));

        let result = self.books.update_one(&in_stock(book), &update)?;
        if result.modified_count != 1 {
            return Err(PurchaseError::SoldOut(book.clone()));
        }

        tracing::debug!(book = %book.id, customer = %order.customer, "checked out");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::orders::testing::{orders, stock, store_with_book};
    use bookstore_db::Filter;

    #[test]
    fn embeds_the_order_in_the_book() {
        let (store, book) = store_with_book(2);
        let service = AtomicOrderService::new(&store);

        let order = service.buy(&Customer::jeff(), &book).unwrap();
        assert_eq!(order.customer, "jeff.yemin@mongodb.com");
        assert_eq!(order.books, vec![book.clone()]);
        assert_eq!(stock(&store, &book), 1);
        assert_eq!(orders(&store), 0);

        let document = store
            .collection(BOOKS_COLLECTION)
            .find_one(&Filter::by_id("b1"))
            .unwrap()
            .unwrap();
        let checkout = document[CHECKOUT_FIELD].as_array().unwrap();
        assert_eq!(checkout.len(), 1);
        assert_eq!(checkout[0]["by"], "jeff.yemin@mongodb.com");
    }

    #[test]
    fn sold_out_leaves_the_book_untouched() {
        let (store, book) = store_with_book(0);
        let service = AtomicOrderService::new(&store);

        let err = service.buy(&Customer::guest(), &book).unwrap_err();
        assert!(matches!(err, PurchaseError::SoldOut(ref b) if b.id == "b1"));
        assert_eq!(stock(&store, &book), 0);
        let document = store
            .collection(BOOKS_COLLECTION)
            .find_one(&Filter::by_id("b1"))
            .unwrap()
            .unwrap();
        assert!(document.get(CHECKOUT_FIELD).is_none());
    }

    #[test]
    fn concurrent_buyers_never_oversell() {
        let (store, book) = store_with_book(4);
        let service = AtomicOrderService::new(&store);

        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..10)
                .map(|_| scope.spawn(|| service.buy(&Customer::guest(), &book).is_ok()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|sold| **sold).count(), 4);
        assert_eq!(stock(&store, &book), 0);
    }
}
