pub mod shared {
    pub mod constants;
    pub mod detection_config;
    pub mod error;
    pub mod frame;
    pub mod model_resolver;
    pub mod region;
    pub mod video_metadata;
}

pub mod video {
    pub mod domain {
        pub mod frame_sampler;
        pub mod image_reader;
        pub mod image_writer;
        pub mod video_reader;
        pub mod video_writer;
    }
    pub mod infrastructure;
}

pub mod detection {
    pub mod domain {
        pub mod confidence;
        pub mod embedding;
        pub mod face_backend;
        pub mod face_matcher;
        pub mod mask_scorer;
        pub mod reference_gallery;
        pub mod track_aggregator;
    }
    pub mod infrastructure;
}

pub mod report {
    pub mod domain {
        pub mod detection_event;
        pub mod detection_store;
        pub mod report_format;
    }
}

pub mod pipeline {
    pub mod clip_recorder;
    pub mod detection_job;
    pub mod job_control;
    pub mod job_observer;
    pub mod job_state;
    pub mod unattended_observer;
    pub mod infrastructure;
}

#[cfg(test)]
pub(crate) mod testing;
