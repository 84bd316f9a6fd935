use crate::logic::object::GameObject;
use hashbrown::HashMap;
use std::any::{Any, TypeId};

/// A behavior unit aggregated by a game object. Components are not
/// independently schedulable; their hooks run on the owner's logic thread.
pub trait Component: Send + 'static {
    fn as_any(&mut self) -> &mut dyn Any;

    fn on_attach(&mut self, _obj: &GameObject) {}
    fn on_detach(&mut self, _obj: &GameObject) {}
    fn on_fixed_update(&mut self, _obj: &GameObject) {}
    fn on_update(&mut self, _obj: &GameObject) {}
}

/// Ordered component container with O(1) lookup by type. One instance per
/// component type.
pub struct ComponentSet {
    items: Vec<(TypeId, Box<dyn Component>)>,
    index: HashMap<TypeId, usize>,
}

impl ComponentSet {
    pub fn new() -> ComponentSet {
        ComponentSet {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn has<T: Component>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Attaches a component and runs its attach hook. Panics on a
    /// duplicate type: one instance per component type.
    pub fn attach<T: Component>(&mut self, component: T, obj: &GameObject) {
        let key = TypeId::of::<T>();
        if self.index.contains_key(&key) {
            panic!("Component already attached");
        }

        self.items.push((key, Box::new(component)));
        self.index.insert(key, self.items.len() - 1);

        let slot = self.items.last_mut().expect("Component vanished on attach");
        slot.1.on_attach(obj);
    }

    /// Runs the detach hook and removes the component. Returns false when
    /// the type is not attached.
    pub fn detach<T: Component>(&mut self, obj: &GameObject) -> bool {
        let key = TypeId::of::<T>();
        let position = match self.index.remove(&key) {
            Some(position) => position,
            None => return false,
        };

        self.items[position].1.on_detach(obj);
        self.items.remove(position);

        // Removal shifts everything behind it; rebuild the index.
        self.index.clear();
        for (position, (key, _)) in self.items.iter().enumerate() {
            self.index.insert(*key, position);
        }

        true
    }

    pub fn get<T: Component>(&mut self) -> Option<&mut T> {
        let position = *self.index.get(&TypeId::of::<T>())?;
        self.items[position].1.as_any().downcast_mut::<T>()
    }

    /// Runs every component's fixed-update hook in attach order.
    pub fn fixed_update(&mut self, obj: &GameObject) {
        for (_, component) in self.items.iter_mut() {
            component.on_fixed_update(obj);
        }
    }

    /// Runs every component's per-frame hook in attach order.
    pub fn update(&mut self, obj: &GameObject) {
        for (_, component) in self.items.iter_mut() {
            component.on_update(obj);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::object::tests::bare_object;

    struct Health {
        value: i32,
        attached: bool,
    }

    impl Component for Health {
        fn as_any(&mut self) -> &mut dyn Any {
            self
        }

        fn on_attach(&mut self, _obj: &GameObject) {
            self.attached = true;
        }

        fn on_detach(&mut self, _obj: &GameObject) {
            self.attached = false;
        }

        fn on_fixed_update(&mut self, _obj: &GameObject) {
            self.value += 1;
        }
    }

    struct Tag(&'static str);

    impl Component for Tag {
        fn as_any(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_attach_get_detach() {
        let (_runtime, obj) = bare_object();
        let mut components = ComponentSet::new();

        components.attach(Health { value: 10, attached: false }, &obj);
        components.attach(Tag("npc"), &obj);

        assert_eq!(components.len(), 2);
        assert!(components.has::<Health>());
        assert!(components.get::<Health>().unwrap().attached);
        assert_eq!(components.get::<Tag>().unwrap().0, "npc");

        assert!(components.detach::<Health>(&obj));
        assert!(!components.has::<Health>());
        assert!(!components.detach::<Health>(&obj));

        // Index survives the removal shift.
        assert_eq!(components.get::<Tag>().unwrap().0, "npc");
    }

    #[test]
    fn test_fixed_update_reaches_components() {
        let (_runtime, obj) = bare_object();
        let mut components = ComponentSet::new();
        components.attach(Health { value: 0, attached: false }, &obj);

        components.fixed_update(&obj);
        components.fixed_update(&obj);

        assert_eq!(components.get::<Health>().unwrap().value, 2);
    }

    #[test]
    #[should_panic(expected = "Component already attached")]
    fn test_duplicate_attach_panics() {
        let (_runtime, obj) = bare_object();
        let mut components = ComponentSet::new();
        components.attach(Tag("a"), &obj);
        components.attach(Tag("b"), &obj);
    }
}
