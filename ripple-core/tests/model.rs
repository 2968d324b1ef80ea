//! Model Entity Tests
//!
//! A hand-wired entity with several properties, the way generated model
//! types plug into the engine: one `TrackingProperty` per slot, and an
//! index-keyed dispatch from the entity capabilities to the right slot.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ripple_core::reactive::{Autorun, Batch};
use ripple_core::tracking::{
    Accessor, Entity, EntityId, InvariantViolation, Notification, PropertyLabel, Result,
    Subscriber, TrackableObject, TrackingContext, TrackingError, TrackingProperty,
    TrackingSubscriber, UpdateReason,
};

const FIRST: usize = 0;
const LAST: usize = 1;
const FULL: usize = 2;

struct Person {
    id: EntityId,
    name: String,
    context: Rc<TrackingContext>,
    first_name: RefCell<String>,
    last_name: RefCell<String>,
    first: TrackingProperty<String>,
    last: TrackingProperty<String>,
    full: TrackingProperty<String>,
    full_evaluations: Cell<usize>,
}

struct First;
struct Last;
struct Full;

impl Accessor<Person> for First {
    type Value = String;

    fn property_name(&self) -> Option<&str> {
        Some("first")
    }

    fn index(&self) -> usize {
        FIRST
    }

    fn is_variable(&self) -> bool {
        true
    }

    fn get(&self, person: &Person) -> Result<String> {
        Ok(person.first_name.borrow().clone())
    }

    fn set(&self, person: &Person, value: String) -> Result<()> {
        *person.first_name.borrow_mut() = value;
        Ok(())
    }
}

impl Accessor<Person> for Last {
    type Value = String;

    fn property_name(&self) -> Option<&str> {
        Some("last")
    }

    fn index(&self) -> usize {
        LAST
    }

    fn is_variable(&self) -> bool {
        true
    }

    fn get(&self, person: &Person) -> Result<String> {
        Ok(person.last_name.borrow().clone())
    }

    fn set(&self, person: &Person, value: String) -> Result<()> {
        *person.last_name.borrow_mut() = value;
        Ok(())
    }
}

impl Accessor<Person> for Full {
    type Value = String;

    fn property_name(&self) -> Option<&str> {
        Some("full")
    }

    fn index(&self) -> usize {
        FULL
    }

    fn is_variable(&self) -> bool {
        false
    }

    fn get(&self, person: &Person) -> Result<String> {
        person.full_evaluations.set(person.full_evaluations.get() + 1);
        Ok(format!("{} {}", person.first()?, person.last()?))
    }

    fn set(&self, person: &Person, _value: String) -> Result<()> {
        Err(InvariantViolation::AssignToComputed {
            property: PropertyLabel::new(person, self).to_string(),
        }
        .into())
    }
}

impl Person {
    fn new(context: &Rc<TrackingContext>, name: &str, first: &str, last: &str) -> Rc<Self> {
        let person = Rc::new(Person {
            id: EntityId::new(),
            name: name.to_string(),
            context: Rc::clone(context),
            first_name: RefCell::new(first.to_string()),
            last_name: RefCell::new(last.to_string()),
            first: TrackingProperty::new(),
            last: TrackingProperty::new(),
            full: TrackingProperty::new(),
            full_evaluations: Cell::new(0),
        });
        let entity = Rc::downgrade(&person) as Weak<dyn TrackingSubscriber>;
        context.register(person.id, entity);
        person
    }

    fn first(&self) -> Result<String> {
        self.first.get(self, &First)
    }

    fn last(&self) -> Result<String> {
        self.last.get(self, &Last)
    }

    fn full(&self) -> Result<String> {
        self.full.get(self, &Full)
    }

    fn set_first(&self, value: &str) -> Result<()> {
        self.first.set(self, &First, value.to_string())
    }

    fn set_last(&self, value: &str) -> Result<()> {
        self.last.set(self, &Last, value.to_string())
    }

    fn unknown(&self, index: usize) -> TrackingError {
        InvariantViolation::UnknownIndex {
            entity: self.name.clone(),
            index,
        }
        .into()
    }
}

impl Entity for Person {
    fn handle(&self) -> EntityId {
        self.id
    }

    fn context(&self) -> &TrackingContext {
        &self.context
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl TrackingSubscriber for Person {
    fn notify(&self, index: usize, notification: Notification) -> Result<()> {
        match index {
            FIRST => self.first.notify(self, &First, notification),
            LAST => self.last.notify(self, &Last, notification),
            FULL => self.full.notify(self, &Full, notification),
            _ => Err(self.unknown(index)),
        }
    }

    fn update(&self, index: usize, reason: UpdateReason) -> Result<()> {
        match index {
            FIRST => self.first.update(self, &First, reason),
            LAST => self.last.update(self, &Last, reason),
            FULL => self.full.update(self, &Full, reason),
            _ => Err(self.unknown(index)),
        }
    }

    fn property_name(&self, index: usize) -> Option<&str> {
        match index {
            FIRST => First.property_name(),
            LAST => Last.property_name(),
            FULL => Full.property_name(),
            _ => None,
        }
    }

    fn as_trackable(&self) -> Option<&dyn TrackableObject> {
        Some(self)
    }
}

impl TrackableObject for Person {
    fn subscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        match index {
            FIRST => self.first.subscribe(self, &First, subscriber),
            LAST => self.last.subscribe(self, &Last, subscriber),
            FULL => self.full.subscribe(self, &Full, subscriber),
            _ => Err(self.unknown(index)),
        }
    }

    fn unsubscribe(&self, index: usize, subscriber: Subscriber) -> Result<()> {
        match index {
            FIRST => self.first.unsubscribe(self, &First, subscriber),
            LAST => self.last.unsubscribe(self, &Last, subscriber),
            FULL => self.full.unsubscribe(self, &Full, subscriber),
            _ => Err(self.unknown(index)),
        }
    }
}

impl Drop for Person {
    fn drop(&mut self) {
        self.context.unregister(self.id);
        self.full.detach(self, FULL);
        self.last.detach(self, LAST);
        self.first.detach(self, FIRST);
    }
}

type Seen = Rc<RefCell<Vec<String>>>;

fn observe_full(context: &Rc<TrackingContext>, person: &Rc<Person>) -> (Autorun, Seen) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let autorun = {
        let (person, seen) = (person.clone(), seen.clone());
        Autorun::new_in(context, None, move || {
            seen.borrow_mut().push(person.full()?);
            Ok(())
        })
        .unwrap()
    };
    (autorun, seen)
}

/// The computed property depends on sibling properties of the same entity.
#[test]
fn computed_property_tracks_its_siblings() {
    let context = Rc::new(TrackingContext::new());
    let ada = Person::new(&context, "ada", "Ada", "Byron");
    let (_autorun, seen) = observe_full(&context, &ada);

    ada.set_last("Lovelace").unwrap();

    assert_eq!(ada.full().unwrap(), "Ada Lovelace");
    assert_eq!(
        *seen.borrow(),
        vec!["Ada Byron".to_string(), "Ada Lovelace".to_string()]
    );
    assert_eq!(ada.full.snapshot(None).dependencies.len(), 2);
}

/// Renaming both parts in one batch re-evaluates the full name once.
#[test]
fn batched_rename_evaluates_once() {
    let context = Rc::new(TrackingContext::new());
    let ada = Person::new(&context, "ada", "Ada", "Byron");
    let (autorun, seen) = observe_full(&context, &ada);
    assert_eq!(ada.full_evaluations.get(), 1);

    let guard = Batch::open(&context);
    ada.set_first("Augusta").unwrap();
    ada.set_last("King").unwrap();
    guard.close().unwrap();

    assert_eq!(ada.full_evaluations.get(), 2);
    assert_eq!(autorun.run_count(), 2);
    assert_eq!(seen.borrow().last().unwrap(), "Augusta King");
}

/// Assigning the computed slot names the property in the error.
#[test]
fn computed_property_rejects_assignment() {
    let context = Rc::new(TrackingContext::new());
    let ada = Person::new(&context, "ada", "Ada", "Byron");

    let err = ada.full.set(&*ada, &Full, "nobody".to_string()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "tracking invariant violated: `ada.full` is computed and can't be assigned"
    );
}

/// Capabilities resolved through the registry route by property index.
#[test]
fn dispatch_routes_by_index() {
    let context = Rc::new(TrackingContext::new());
    let ada = Person::new(&context, "ada", "Ada", "Byron");
    let entity = context.resolve(ada.id).unwrap();

    assert_eq!(entity.property_name(LAST), Some("last"));
    assert_eq!(entity.property_name(7), None);
    assert!(entity.update(7, UpdateReason::Requested).is_err());

    let err = entity.notify(FIRST, Notification::Stale).unwrap_err();
    assert!(matches!(
        err,
        TrackingError::Invariant(InvariantViolation::NotifyWithoutData { .. })
    ));
}

/// Raw notification codes decode, and unknown ones are rejected.
#[test]
fn raw_notification_codes() {
    assert_eq!(Notification::try_from(2u8).unwrap(), Notification::ReadyModified);
    let err = Notification::try_from(9u8).unwrap_err();
    assert!(matches!(
        err,
        TrackingError::Invariant(InvariantViolation::UnknownNotification(9))
    ));
}

/// Disposing the observer relaxes every slot of the entity.
#[test]
fn disposing_the_observer_relaxes_all_slots() {
    let context = Rc::new(TrackingContext::new());
    let ada = Person::new(&context, "ada", "Ada", "Byron");
    let (autorun, _seen) = observe_full(&context, &ada);
    assert!(ada.first.is_tracked());

    autorun.dispose().unwrap();

    assert!(!ada.full.is_tracked());
    assert!(!ada.first.is_tracked());
    assert!(!ada.last.is_tracked());
}
