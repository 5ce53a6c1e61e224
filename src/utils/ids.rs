macro_rules! id_gen {
    ($mod_name:ident) => {
        mod $mod_name {
            static NEXT_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
            lazy_static::lazy_static! {
                static ref IDS: std::sync::Mutex<std::collections::HashSet<usize>> =
                    std::sync::Mutex::new(std::collections::HashSet::new());
            }

            pub(crate) fn next() -> usize {
                let mut ids = IDS.lock().unwrap();
                if ids.len() == usize::MAX {
                    panic!("Out of ids");
                }

                let id = loop {
                    let new_id = NEXT_ID.fetch_update(
                        std::sync::atomic::Ordering::SeqCst,
                        std::sync::atomic::Ordering::SeqCst,
                        |mut id| {
                            while ids.contains(&id) {
                                id += 1;
                            }
                            id += 1;
                            Some(id)
                        },
                    );
                    if let Ok(id) = new_id {
                        break id;
                    }
                };

                ids.insert(id);
                id
            }

            pub(crate) fn remove(id: usize) -> bool {
                IDS.lock().unwrap().remove(&id)
            }
        }
    };
}

pub(crate) use id_gen;
