use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub category: String,
    pub name: String,
}

impl TaskDescriptor {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// The `category:name` form used as the log label.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl Display for TaskDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

/// Fixed, non-empty task list with a wrapping cursor.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: Vec<TaskDescriptor>,
    current: usize,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Result<Self, ConfigError> {
        let catalog = Self { tasks, current: 0 };
        if catalog.is_empty() {
            return Err(ConfigError::EmptyTaskList);
        }
        Ok(catalog)
    }

    pub fn current(&self) -> &TaskDescriptor {
        &self.tasks[self.current]
    }

    pub fn next(&mut self) -> &TaskDescriptor {
        self.current = (self.current + 1) % self.tasks.len();
        self.current()
    }

    pub fn prev(&mut self) -> &TaskDescriptor {
        self.current = (self.current + self.tasks.len() - 1) % self.tasks.len();
        self.current()
    }

    /// Moves the cursor to the task with the given label. Unknown labels
    /// leave the cursor where it was.
    pub fn select(&mut self, label: &str) -> bool {
        match self.tasks.iter().position(|task| task.label() == label) {
            Some(index) => {
                self.current = index;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter()
    }
}
